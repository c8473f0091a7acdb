//! multitail: follow several files at once, prefixing each line with its file.
//!
//! Usage:
//!     multitail /path/to/file1 /path/to/file2 ...
//!     multitail --from-start --poll-ms 500 app.log

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use multitail::{Dispatcher, SignalMode, StartPosition, TailConfig, DEFAULT_EVENT_CAPACITY};

#[derive(Parser, Debug)]
#[clap(name = "multitail")]
#[clap(about = "Tail several growing files into one stream", long_about = None)]
struct Args {
    /// Files to follow; each must already exist
    #[clap(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Print existing content before following appends
    #[clap(long)]
    from_start: bool,

    /// Poll every MS milliseconds instead of using filesystem notifications
    #[clap(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Number of lines buffered before readers wait for output
    #[clap(long, value_name = "N", default_value_t = DEFAULT_EVENT_CAPACITY)]
    buffer: usize,
}

impl Args {
    fn config(&self) -> TailConfig {
        let start = if self.from_start {
            StartPosition::Beginning
        } else {
            StartPosition::End
        };
        let signal = match self.poll_ms {
            Some(ms) => SignalMode::Poll(Duration::from_millis(ms)),
            None => SignalMode::Notify,
        };

        TailConfig::default()
            .with_start(start)
            .with_signal(signal)
            .with_event_capacity(self.buffer)
    }
}

/// `RUST_LOG` when set and valid, `info` otherwise.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(env_filter())
        .init();

    let args = Args::parse();

    let mut tail = match Dispatcher::new(args.config()).start(args.files.clone()).await {
        Ok(tail) => tail,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = tail.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted, shutting down");
                cancel.cancel();
            }
            Err(e) => warn!("unable to listen for interrupts: {}", e),
        }
    });

    let stdout = io::stdout();
    while let Some(event) = tail.next_event().await {
        let mut out = stdout.lock();
        if let Err(e) = writeln!(out, "{}", event) {
            warn!("stdout closed: {}", e);
            break;
        }
    }

    for report in tail.shutdown().await {
        info!(path = %report.path.display(), exit = ?report.exit, "stopped");
    }

    ExitCode::SUCCESS
}
