//! urfetch End-to-End Smoke Test
//!
//! Runs the real driver on a real io_uring against loopback peers:
//!   Part A — Happy path: N sessions, chunked body, files on disk
//!   Part B — Empty responses: peer closes right after the request
//!   Part C — Fatal paths: refused connect, reset during receive
//!
//! Run: ./target/release/urfetch-smoke [sessions]

use urfetch_core::config::{Endpoint, FetchConfig};
use urfetch_core::error::{FetchError, Violation};
use urfetch_core::kprint::{self, LogLevel};

use urfetch_driver::fetch_with_uring;
use urfetch_module::output_sink;

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::thread;
use std::time::{Duration, Instant};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        self.total += 1;
        if ok {
            self.passed += 1;
            println!("  [{:2}] {:<52} PASS", self.total, name);
        } else {
            self.failed += 1;
            println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

// ── Loopback peers ──

#[derive(Clone, Copy)]
enum Behaviour {
    /// Read the request, write the body in chunks, close.
    Serve(&'static [u8], usize),
    /// Read the request, close without a byte.
    Hangup,
    /// Read the request, close with SO_LINGER 0 (RST).
    Reset,
}

fn read_request(conn: &mut TcpStream) -> Vec<u8> {
    let mut req = Vec::new();
    let mut buf = [0u8; 256];
    while !req.ends_with(b"\r\n\r\n") {
        match conn.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => req.extend_from_slice(&buf[..n]),
        }
    }
    req
}

fn serve(mut conn: TcpStream, behaviour: Behaviour) {
    let _ = read_request(&mut conn);
    match behaviour {
        Behaviour::Serve(body, chunk) => {
            for part in body.chunks(chunk) {
                if conn.write_all(part).is_err() {
                    return;
                }
                let _ = conn.flush();
            }
        }
        Behaviour::Hangup => {}
        Behaviour::Reset => {
            let linger = libc::linger { l_onoff: 1, l_linger: 0 };
            unsafe {
                libc::setsockopt(
                    conn.as_raw_fd(),
                    libc::SOL_SOCKET,
                    libc::SO_LINGER,
                    &linger as *const _ as *const _,
                    std::mem::size_of::<libc::linger>() as u32,
                );
            }
        }
    }
}

/// Listener that serves `conns` connections, one thread each.
fn spawn_peer(conns: usize, behaviour: Behaviour) -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let endpoint = match listener.local_addr().expect("local_addr") {
        SocketAddr::V4(a) => Endpoint::from(a),
        SocketAddr::V6(_) => unreachable!("bound an IPv4 address"),
    };
    thread::spawn(move || {
        for _ in 0..conns {
            match listener.accept() {
                Ok((conn, _)) => {
                    thread::spawn(move || serve(conn, behaviour));
                }
                Err(_) => return,
            }
        }
    });
    endpoint
}

/// A port with nobody listening.
fn dead_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    match listener.local_addr().expect("local_addr") {
        SocketAddr::V4(a) => Endpoint::from(a),
        SocketAddr::V6(_) => unreachable!("bound an IPv4 address"),
    }
}

fn page() -> &'static [u8] {
    static PAGE: std::sync::OnceLock<Vec<u8>> = std::sync::OnceLock::new();
    PAGE.get_or_init(|| {
        let mut page = b"HTTP/1.0 200 OK\r\nContent-Type: text/html\r\n\r\n".to_vec();
        for i in 0..400 {
            page.extend_from_slice(format!("<p>line {}</p>\n", i).as_bytes());
        }
        page
    })
}

// ════════════════════════════════════════════════════════════
// Part A: Happy path
// ════════════════════════════════════════════════════════════

fn test_happy(t: &mut TestRunner, sessions: usize) {
    t.section("Part A: N sessions, chunked body");

    let endpoint = spawn_peer(sessions, Behaviour::Serve(page(), 700));
    let out = std::env::temp_dir().join(format!("urfetch-smoke-{}", std::process::id()));
    let config = FetchConfig::new().sessions(sessions).endpoint(endpoint).output_dir(out.clone());

    let start = Instant::now();
    let report = match fetch_with_uring(&config) {
        Ok(r) => r,
        Err(e) => {
            t.check("fetch completes", false, &e.to_string());
            return;
        }
    };
    println!("  {} sessions in {}ms", sessions, start.elapsed().as_millis());
    t.check("fetch completes", true, "");
    t.check(
        "one output per session",
        report.outputs.len() == sessions,
        &format!("{} outputs", report.outputs.len()),
    );
    let mismatched = report.outputs.iter().filter(|o| o.as_slice() != page()).count();
    t.check("every output equals the page", mismatched == 0, &format!("{} differ", mismatched));
    t.check(
        "byte counter matches",
        report.bytes_received == (page().len() * sessions) as u64,
        &format!("{} bytes", report.bytes_received),
    );

    let written = output_sink::prepare(&out)
        .and_then(|_| output_sink::write_outputs(&out, config.output_ext.as_deref(), &report.outputs));
    t.check(
        "files written by index",
        matches!(written, Ok(n) if n == sessions) && out.join("0").is_file(),
        &format!("{:?}", written),
    );
    let last = out.join((sessions - 1).to_string());
    t.check(
        "last file has the page",
        std::fs::read(&last).map(|b| b == page()).unwrap_or(false),
        &last.display().to_string(),
    );
    let _ = std::fs::remove_dir_all(&out);
}

// ════════════════════════════════════════════════════════════
// Part B: Empty responses
// ════════════════════════════════════════════════════════════

fn test_empty(t: &mut TestRunner) {
    t.section("Part B: peer closes without a body");

    let endpoint = spawn_peer(4, Behaviour::Hangup);
    let config = FetchConfig::new().sessions(4).endpoint(endpoint);
    match fetch_with_uring(&config) {
        Ok(report) => {
            t.check("fetch completes", true, "");
            t.check("all outputs empty", report.non_empty() == 0, &format!("{} non-empty", report.non_empty()));
        }
        Err(e) => t.check("fetch completes", false, &e.to_string()),
    }
}

// ════════════════════════════════════════════════════════════
// Part C: Fatal paths
// ════════════════════════════════════════════════════════════

fn test_fatal(t: &mut TestRunner) {
    t.section("Part C: protocol violations abort");

    let config = FetchConfig::new().sessions(2).endpoint(dead_endpoint());
    let refused = fetch_with_uring(&config);
    t.check(
        "refused connect is fatal",
        matches!(
            refused,
            Err(FetchError::Protocol { violation: Violation::ConnectFailed(r), .. })
                if r == -(libc::ECONNREFUSED as i64)
        ),
        &format!("{:?}", refused.map(|r| r.outputs.len())),
    );

    let endpoint = spawn_peer(1, Behaviour::Reset);
    let config = FetchConfig::new().sessions(1).endpoint(endpoint);
    let reset = fetch_with_uring(&config);
    t.check(
        "reset during receive is fatal",
        matches!(
            reset,
            Err(FetchError::Protocol { violation: Violation::ReceiveFailed(r), .. })
                if r == -(libc::ECONNRESET as i64)
        ),
        &format!("{:?}", reset.map(|r| r.outputs.len())),
    );
}

fn main() {
    println!("=== urfetch End-to-End Smoke Test ===");
    let kver = std::fs::read_to_string("/proc/version").unwrap_or_default();
    println!("    kernel: {}", kver.trim().split(' ').nth(2).unwrap_or("?"));

    if std::env::var("URF_LOG_LEVEL").is_err() {
        kprint::set_log_level(LogLevel::Warn);
    }
    let sessions: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(64);

    let mut t = TestRunner::new();
    test_happy(&mut t, sessions);
    test_empty(&mut t);
    test_fatal(&mut t);

    // Let peer threads finish their writes before the summary.
    thread::sleep(Duration::from_millis(10));
    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
