mod config;
mod fetch;
mod watch;

use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(name = "flagsync")]
#[command(version)]
#[command(about = "Stream and pull feature flag data", long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(ClapArgs, Debug)]
struct Connection {
    /// Path to config file
    #[arg(short = 'c', long = "config", default_value = "flagsync.toml")]
    config: String,

    /// SDK key sent as the Authorization header
    #[arg(long = "sdk-key", env = "FLAGSYNC_SDK_KEY", hide_env_values = true)]
    sdk_key: Option<String>,

    /// Base URI of the streaming service
    #[arg(long = "stream-uri", env = "FLAGSYNC_STREAM_URI")]
    stream_uri: Option<String>,

    /// Base URI of the polling service
    #[arg(long = "base-uri", env = "FLAGSYNC_BASE_URI")]
    base_uri: Option<String>,
}

impl Connection {
    fn resolve(self) -> flagsync::Config {
        let file = match config::load_file_config(&self.config) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to read config {}", e);
                std::process::exit(1);
            }
        };
        let overrides = Overrides {
            sdk_key: self.sdk_key,
            stream_uri: self.stream_uri,
            base_uri: self.base_uri,
        };
        match config::resolve(overrides, file) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep an in-memory copy of all flags in sync and report changes
    Watch {
        #[command(flatten)]
        connection: Connection,

        /// Seconds to wait for the first full data set
        #[arg(long = "ready-timeout", default_value_t = 10)]
        ready_timeout: u64,
    },
    /// Pull data once from the polling service and print it
    Fetch {
        #[command(flatten)]
        connection: Connection,

        /// Pull a single flag
        #[arg(long = "flag", conflicts_with = "segment")]
        flag: Option<String>,

        /// Pull a single segment
        #[arg(long = "segment")]
        segment: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flagsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Args::parse();
    match cli.cmd {
        Command::Watch {
            connection,
            ready_timeout,
        } => watch::run_watch(connection.resolve(), ready_timeout).await,
        Command::Fetch {
            connection,
            flag,
            segment,
        } => fetch::run_fetch(connection.resolve(), flag, segment).await,
    }
}
