use std::path::PathBuf;

use bytestream_probe::platform::PlatformGuard;
use bytestream_probe::scenario::run_scenarios;
use bytestream_probe::{report, DefaultResolver, ProbeConfig, Scenario};
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "bytestream-probe")]
#[clap(
    about = "Probe the read/seek contract of an asynchronous byte stream",
    long_about = None
)]
struct Cli {
    /// Stream to probe: http(s)://, file:// or mem:<length>
    uri: Option<String>,

    /// Run only these scenarios (repeatable)
    #[clap(long = "scenario", short = 's')]
    scenarios: Vec<Scenario>,

    /// Print reports as JSON
    #[clap(long)]
    json: bool,

    /// JSON config file; command line arguments take precedence
    #[clap(long)]
    config: Option<PathBuf>,

    /// HTTP request timeout
    #[clap(long)]
    timeout_secs: Option<u64>,

    /// List the available scenarios and exit
    #[clap(long)]
    list: bool,
}

fn build_config(args: Cli) -> bytestream_probe::Result<ProbeConfig> {
    let mut config = match &args.config {
        Some(path) => ProbeConfig::load(path)?,
        None => ProbeConfig::default(),
    };
    if let Some(uri) = args.uri {
        config.uri = uri;
    }
    if !args.scenarios.is_empty() {
        config.scenarios = args.scenarios;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.http.timeout_secs = timeout_secs;
    }
    config.json |= args.json;
    Ok(config)
}

fn main() {
    env_logger::init();

    let args = Cli::parse();
    if args.list {
        for scenario in Scenario::ALL {
            println!("{scenario}");
        }
        return;
    }

    let config = build_config(args).unwrap_or_else(|e| {
        eprintln!("Couldn't load config: {}", e);
        std::process::exit(1);
    });

    let platform = PlatformGuard::start().unwrap_or_else(|e| {
        eprintln!("Couldn't start platform: {}", e);
        std::process::exit(1);
    });

    let resolver = DefaultResolver::new(config.http.clone());
    let scenarios = config.selected_scenarios();
    let reports = match run_scenarios(&resolver, &config.uri, &scenarios) {
        Ok(reports) => reports,
        Err(e) => {
            eprintln!("Couldn't open {}: {}", config.uri, e);
            drop(platform);
            std::process::exit(1);
        }
    };

    if config.json {
        match report::render_json(&reports) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Couldn't render reports: {}", e),
        }
    } else {
        for report in &reports {
            println!("{}", report::render_text(report));
        }
    }

    drop(platform);
}
