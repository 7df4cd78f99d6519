//! Run configuration.
//!
//! The endpoint and request bytes are configuration, not logic: the driver
//! takes them from a [`FetchConfig`] and shares them read-only with every
//! session.

use crate::env::{env_get_opt, env_parse};
use crate::error::{FetchError, Result};

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;

/// Fixed remote endpoint. IPv4 only; there is no name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    addr: SocketAddrV4,
}

impl Endpoint {
    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { addr: SocketAddrV4::new(ip, port) }
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Self { addr }
    }
}

impl FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<SocketAddrV4>().map(Self::from)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.addr, f)
    }
}

/// `www.google.com` at the time the default was picked.
pub const DEFAULT_ENDPOINT: Endpoint = Endpoint::new(Ipv4Addr::new(142, 251, 46, 228), 80);
/// HTTP/1.0 so the peer closes the connection after responding; the close is
/// the only end-of-message signal urfetch understands.
pub const DEFAULT_REQUEST: &[u8] = b"GET / HTTP/1.0\r\n\r\n";
pub const DEFAULT_BUFFER_SIZE: usize = 1023;
pub const DEFAULT_OUTPUT_DIR: &str = "./out/";

/// Build a minimal HTTP/1.0 GET for `path`.
pub fn http_get(path: &str) -> Vec<u8> {
    format!("GET {} HTTP/1.0\r\n\r\n", path).into_bytes()
}

/// Configuration for one fetch run.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Number of concurrent sessions (N).
    pub sessions: usize,
    pub endpoint: Endpoint,
    /// Sent verbatim, in a single send, by every session.
    pub request: Vec<u8>,
    /// Receive buffer capacity per session.
    pub buffer_size: usize,
    pub output_dir: PathBuf,
    /// Appended to the session index to form the output file name.
    pub output_ext: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            sessions: 1,
            endpoint: DEFAULT_ENDPOINT,
            request: DEFAULT_REQUEST.to_vec(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            output_ext: None,
        }
    }
}

impl FetchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with `URF_*` overrides applied.
    ///
    /// - `URF_ENDPOINT`      — `a.b.c.d:port`
    /// - `URF_REQUEST_PATH`  — path for the GET request
    /// - `URF_BUFFER_SIZE`   — receive buffer bytes
    /// - `URF_OUTPUT_DIR`    — output directory
    /// - `URF_OUTPUT_EXT`    — output file extension (e.g. `html`)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(endpoint) = env_parse::<Endpoint>("URF_ENDPOINT").map_err(FetchError::Config)? {
            config.endpoint = endpoint;
        }
        if let Some(path) = env_get_opt::<String>("URF_REQUEST_PATH") {
            config.request = http_get(&path);
        }
        if let Some(size) = env_parse::<usize>("URF_BUFFER_SIZE").map_err(FetchError::Config)? {
            config.buffer_size = size;
        }
        if let Some(dir) = env_get_opt::<PathBuf>("URF_OUTPUT_DIR") {
            config.output_dir = dir;
        }
        config.output_ext = env_get_opt::<String>("URF_OUTPUT_EXT").filter(|e| !e.is_empty());
        Ok(config)
    }

    pub fn sessions(mut self, n: usize) -> Self {
        self.sessions = n;
        self
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn request(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.request = bytes.into();
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn output_ext(mut self, ext: impl Into<String>) -> Self {
        self.output_ext = Some(ext.into());
        self
    }

    /// Reject values the driver cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sessions == 0 {
            return Err(FetchError::Config("session count must be positive".into()));
        }
        if self.request.is_empty() {
            return Err(FetchError::Config("request is empty".into()));
        }
        if self.request.len() > u32::MAX as usize {
            return Err(FetchError::Config(format!(
                "request of {} bytes does not fit a single send",
                self.request.len()
            )));
        }
        if self.buffer_size == 0 || self.buffer_size > u32::MAX as usize {
            return Err(FetchError::Config(format!(
                "buffer size {} out of range",
                self.buffer_size
            )));
        }
        Ok(())
    }
}

/// Parse the session-count argument: a positive integer.
pub fn parse_session_count(arg: Option<&str>) -> Result<usize> {
    let arg = arg.ok_or_else(|| FetchError::Usage("expected a session count".into()))?;
    match arg.trim().parse::<usize>() {
        Ok(0) => Err(FetchError::Usage("session count must be positive".into())),
        Ok(n) => Ok(n),
        Err(_) => Err(FetchError::Usage(format!("{:?} is not a session count", arg))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_run() {
        let c = FetchConfig::default();
        assert_eq!(c.endpoint.to_string(), "142.251.46.228:80");
        assert_eq!(c.request, b"GET / HTTP/1.0\r\n\r\n");
        assert_eq!(c.buffer_size, 1023);
        assert_eq!(c.output_dir, PathBuf::from("./out/"));
        assert!(c.output_ext.is_none());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let c = FetchConfig::new()
            .sessions(8)
            .endpoint("127.0.0.1:8080".parse().unwrap())
            .request(http_get("/index.html"))
            .buffer_size(4096)
            .output_dir("/tmp/urf")
            .output_ext("html");
        assert_eq!(c.sessions, 8);
        assert_eq!(c.endpoint.port(), 8080);
        assert_eq!(c.endpoint.ip(), Ipv4Addr::LOCALHOST);
        assert_eq!(c.request, b"GET /index.html HTTP/1.0\r\n\r\n");
        assert_eq!(c.output_ext.as_deref(), Some("html"));
    }

    #[test]
    fn validate_rejects_unusable_values() {
        assert!(FetchConfig::new().sessions(0).validate().is_err());
        assert!(FetchConfig::new().request(Vec::new()).validate().is_err());
        assert!(FetchConfig::new().buffer_size(0).validate().is_err());
    }

    #[test]
    fn endpoint_rejects_hostnames() {
        assert!("www.google.com:80".parse::<Endpoint>().is_err());
        assert!("10.0.0.1".parse::<Endpoint>().is_err());
        assert_eq!("10.0.0.1:81".parse::<Endpoint>().unwrap().port(), 81);
    }

    #[test]
    fn from_env_reads_overrides() {
        std::env::set_var("URF_ENDPOINT", "127.0.0.1:9000");
        std::env::set_var("URF_REQUEST_PATH", "/a");
        std::env::set_var("URF_BUFFER_SIZE", "64");
        std::env::set_var("URF_OUTPUT_EXT", "html");
        let c = FetchConfig::from_env().unwrap();
        assert_eq!(c.endpoint.to_string(), "127.0.0.1:9000");
        assert_eq!(c.request, b"GET /a HTTP/1.0\r\n\r\n");
        assert_eq!(c.buffer_size, 64);
        assert_eq!(c.output_ext.as_deref(), Some("html"));

        std::env::set_var("URF_ENDPOINT", "nowhere");
        assert!(matches!(FetchConfig::from_env(), Err(FetchError::Config(_))));

        for key in ["URF_ENDPOINT", "URF_REQUEST_PATH", "URF_BUFFER_SIZE", "URF_OUTPUT_EXT"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn session_count_argument() {
        assert_eq!(parse_session_count(Some("3")).unwrap(), 3);
        assert!(matches!(parse_session_count(None), Err(FetchError::Usage(_))));
        assert!(matches!(parse_session_count(Some("0")), Err(FetchError::Usage(_))));
        assert!(matches!(parse_session_count(Some("-2")), Err(FetchError::Usage(_))));
        assert!(matches!(parse_session_count(Some("many")), Err(FetchError::Usage(_))));
    }
}
