//! Server configuration
//!
//! Read-only after startup. The binary populates this from CLI flags and
//! environment variables; tests construct it directly.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::protocol::{BITS_METHOD, BITS_PROTOCOL_GUID};

#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address the HTTP listener binds to.
    pub listen: SocketAddr,
    /// Directory under which session directories are placed.
    pub temp_root: PathBuf,
    /// The single BITS protocol GUID this server speaks.
    pub protocol: String,
    /// HTTP method accepted for BITS packets.
    pub allowed_method: String,
    /// Maximum total file length in bytes; `0` disables the limit.
    pub max_size: u64,
    /// Allow regex list applied to upload filenames; at least one must match.
    pub allow_patterns: Vec<String>,
    /// Deny regex list, evaluated first; any match rejects.
    pub deny_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ([0, 0, 0, 0], 8080).into(),
            temp_root: PathBuf::from("./bits-uploads"),
            protocol: BITS_PROTOCOL_GUID.to_string(),
            allowed_method: BITS_METHOD.to_string(),
            max_size: 0,
            allow_patterns: vec![".*".to_string()],
            deny_patterns: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_accept_everything() {
        let config = Config::default();
        assert_eq!(config.allowed_method, "BITS_POST");
        assert_eq!(config.protocol, "{7df0354d-249b-430f-820d-3d2a9bef4931}");
        assert_eq!(config.max_size, 0);
        assert_eq!(config.allow_patterns, vec![".*"]);
        assert!(config.deny_patterns.is_empty());
    }
}
