use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use super::{ByteSource, Capabilities, ReadFuture};

/// Local file read through the same range interface as [`super::HttpSource`].
pub struct FileSource {
    id: String,
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        let size = file.metadata()?.len();
        log::debug!("file-source: opened {} ({} bytes)", path.display(), size);

        Ok(Self {
            id: path.display().to_string(),
            path,
            file: Mutex::new(File::from_std(file)),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_at(&self, offset: u64, length: u64) -> crate::Result<Vec<u8>> {
        let available = self.size.saturating_sub(offset);
        let read_len = length.min(available) as usize;
        if read_len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; read_len];
        file.read_exact(&mut buffer).await?;
        Ok(buffer)
    }
}

impl ByteSource for FileSource {
    fn total_size(&self) -> u64 {
        self.size
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READABLE | Capabilities::SEEKABLE
    }

    fn read_range(&self, offset: u64, length: u64) -> ReadFuture<'_> {
        Box::pin(self.read_at(offset, length))
    }

    fn source_id(&self) -> &str {
        &self.id
    }
}
