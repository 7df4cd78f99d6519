//! urfetch
//!
//! Fetch N copies of a page at once: N TCP sessions, one thread, one
//! io_uring. Each session connects, sends the request in one shot, reads
//! until the peer closes, and its bytes land in `<out>/<index>`.
//!
//! Usage:
//!     cargo build --release -p urfetch
//!     ./target/release/urfetch <sessions>
//!
//! Environment:
//!     URF_ENDPOINT=a.b.c.d:port   (default 142.251.46.228:80)
//!     URF_REQUEST_PATH=/path      (default /)
//!     URF_BUFFER_SIZE=bytes       (default 1023)
//!     URF_OUTPUT_DIR=dir          (default ./out/)
//!     URF_OUTPUT_EXT=html         (default: none)
//!     URF_LOG_LEVEL=debug         (default: info)

use urfetch_core::config::{parse_session_count, FetchConfig};
use urfetch_core::error::{FetchError, Result};
use urfetch_core::{kerror, kinfo};

use urfetch_driver::FetchReport;
use urfetch_module::output_sink;

use std::process::ExitCode;
use std::time::Instant;

fn usage() {
    eprintln!("usage: urfetch <sessions>");
    eprintln!("    <sessions>  number of concurrent fetches (positive integer)");
}

#[cfg(target_os = "linux")]
fn fetch(config: &FetchConfig) -> Result<FetchReport> {
    urfetch_driver::fetch_with_uring(config)
}

#[cfg(not(target_os = "linux"))]
fn fetch(_config: &FetchConfig) -> Result<FetchReport> {
    Err(FetchError::Config("io_uring requires Linux".into()))
}

fn run(sessions: usize) -> Result<()> {
    let config = FetchConfig::from_env()?.sessions(sessions);
    config.validate()?;

    output_sink::prepare(&config.output_dir)?;

    // Timed span: reactor setup through the last close.
    let start = Instant::now();
    let report = fetch(&config)?;
    let elapsed = start.elapsed();
    println!("Time elapsed: {}ms", elapsed.as_millis());

    let files = output_sink::write_outputs(&config.output_dir, config.output_ext.as_deref(), &report.outputs)?;
    kinfo!(
        "urfetch: wrote {} of {} outputs to {} ({} bytes)",
        files,
        report.outputs.len(),
        config.output_dir.display(),
        report.bytes_received
    );
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        usage();
        return ExitCode::FAILURE;
    }
    let sessions = match parse_session_count(args.get(1).map(String::as_str)) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("urfetch: {}", e);
            usage();
            return ExitCode::FAILURE;
        }
    };

    match run(sessions) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ FetchError::Protocol { .. }) => {
            // Fatal by design: no partial results are written.
            kerror!("urfetch: fatal: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            kerror!("urfetch: {}", e);
            ExitCode::FAILURE
        }
    }
}
