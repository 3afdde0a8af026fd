use std::sync::Arc;

use url::Url;

use crate::source::{ByteSource, FileSource, HttpConfig, HttpSource, MemorySource};
use crate::{platform, ByteStream, ProbeError, Result};

/// Turns a URI into an open [`ByteStream`].
pub trait StreamResolver {
    fn resolve(&self, uri: &str) -> Result<ByteStream>;
}

/// Resolver for the schemes this crate ships sources for:
///
/// * `http://`, `https://` through [`HttpSource`];
/// * `file://` through [`FileSource`];
/// * `mem:<length>` through [`MemorySource::patterned`].
#[derive(Debug, Clone, Default)]
pub struct DefaultResolver {
    http: HttpConfig,
}

impl DefaultResolver {
    pub fn new(http: HttpConfig) -> Self {
        Self { http }
    }

    fn source(&self, url: Url) -> Result<Arc<dyn ByteSource>> {
        match url.scheme() {
            "http" | "https" => {
                let connect = HttpSource::connect(url, self.http.clone());
                Ok(Arc::new(platform::block_on(connect)??))
            }
            "file" => {
                let path = url.to_file_path().map_err(|_| {
                    ProbeError::InvalidArgument(format!(
                        "{url} is not a local path"
                    ))
                })?;
                Ok(Arc::new(FileSource::open(path)?))
            }
            "mem" => {
                let length = url.path().parse::<usize>().map_err(|_| {
                    ProbeError::InvalidArgument(format!(
                        "{url} does not name a length"
                    ))
                })?;
                Ok(Arc::new(MemorySource::patterned(length)))
            }
            other => Err(ProbeError::UnsupportedScheme(other.to_owned())),
        }
    }
}

impl StreamResolver for DefaultResolver {
    fn resolve(&self, uri: &str) -> Result<ByteStream> {
        log::debug!("resolver: resolving {}", uri);
        let url = Url::parse(uri)?;
        ByteStream::new(self.source(url)?)
    }
}
