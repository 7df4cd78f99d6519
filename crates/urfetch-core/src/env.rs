//! Environment variable helpers.
//!
//! All urfetch overrides use the `URF_` prefix. Two flavours:
//!
//! - `env_get*`: lenient, fall back to the default on unset *or* unparsable.
//!   Used for knobs where a typo should not stop a run (log level, flushing).
//! - [`env_parse`]: strict, reports an unparsable value. Used by
//!   `FetchConfig::from_env` where silently fetching from the wrong endpoint
//!   would be worse than refusing to start.

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` if the variable is set and parses, `None` otherwise.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default.
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Any other set value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Strict lookup: `Ok(None)` if unset, `Err` naming the key and value if set
/// but unparsable.
pub fn env_parse<T>(key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{}={:?} is not valid", key, val)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_falls_back() {
        let n: usize = env_get("__URF_TEST_UNSET__", 42);
        assert_eq!(n, 42);
        assert!(env_get_opt::<u16>("__URF_TEST_UNSET__").is_none());
        assert_eq!(env_get_str("__URF_TEST_UNSET__", "out"), "out");
        assert!(env_get_bool("__URF_TEST_UNSET__", true));
        assert_eq!(env_parse::<u16>("__URF_TEST_UNSET__"), Ok(None));
    }

    #[test]
    fn lenient_ignores_garbage_strict_reports_it() {
        std::env::set_var("__URF_TEST_GARBAGE__", "lots");
        let n: usize = env_get("__URF_TEST_GARBAGE__", 7);
        assert_eq!(n, 7);
        let err = env_parse::<usize>("__URF_TEST_GARBAGE__").unwrap_err();
        assert!(err.contains("__URF_TEST_GARBAGE__"), "{}", err);
        std::env::remove_var("__URF_TEST_GARBAGE__");
    }

    #[test]
    fn values_are_trimmed() {
        std::env::set_var("__URF_TEST_PADDED__", " 2048 ");
        assert_eq!(env_get("__URF_TEST_PADDED__", 0usize), 2048);
        assert_eq!(env_parse::<usize>("__URF_TEST_PADDED__"), Ok(Some(2048)));
        std::env::remove_var("__URF_TEST_PADDED__");
    }

    #[test]
    fn bool_variants() {
        for (val, want) in [("1", true), ("TRUE", true), ("on", true), ("0", false), ("nope", false)] {
            std::env::set_var("__URF_TEST_BOOL__", val);
            assert_eq!(env_get_bool("__URF_TEST_BOOL__", !want), want, "{}", val);
        }
        std::env::remove_var("__URF_TEST_BOOL__");
    }
}
