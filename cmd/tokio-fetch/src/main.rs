//! Tokio fetcher — comparison baseline
//!
//! Idiomatic Tokio version of urfetch: one task per session on a
//! current-thread runtime, so both run on a single OS thread.
//! Same endpoint, request, output layout and timing line.
//!
//! Usage:
//!     ./target/release/tokio-fetch <sessions>

use urfetch_core::config::{parse_session_count, FetchConfig};
use urfetch_module::output_sink;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn fetch_one(config: Arc<FetchConfig>) -> std::io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(config.endpoint.addr()).await?;
    stream.write_all(&config.request).await?;
    let mut body = Vec::new();
    stream.read_to_end(&mut body).await?;
    Ok(body)
}

async fn fetch_all(config: Arc<FetchConfig>) -> std::io::Result<Vec<Vec<u8>>> {
    let handles: Vec<_> = (0..config.sessions)
        .map(|_| tokio::spawn(fetch_one(config.clone())))
        .collect();

    let mut outputs = Vec::with_capacity(handles.len());
    for handle in handles {
        let body = handle.await.map_err(std::io::Error::other)??;
        outputs.push(body);
    }
    Ok(outputs)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let sessions = match parse_session_count(args.get(1).map(String::as_str)) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("tokio-fetch: {}", e);
            eprintln!("usage: tokio-fetch <sessions>");
            return ExitCode::FAILURE;
        }
    };
    let config = match FetchConfig::from_env() {
        Ok(c) => Arc::new(c.sessions(sessions)),
        Err(e) => {
            eprintln!("tokio-fetch: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = output_sink::prepare(&config.output_dir) {
        eprintln!("tokio-fetch: {}: {}", config.output_dir.display(), e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("tokio-fetch: runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let outputs = match runtime.block_on(fetch_all(config.clone())) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("tokio-fetch: fatal: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("Time elapsed: {}ms", start.elapsed().as_millis());

    match output_sink::write_outputs(&config.output_dir, config.output_ext.as_deref(), &outputs) {
        Ok(n) => {
            eprintln!("tokio-fetch: wrote {} of {} outputs", n, outputs.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("tokio-fetch: write: {}", e);
            ExitCode::FAILURE
        }
    }
}
