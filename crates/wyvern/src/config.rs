//! Server configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```toml
//! bind_addr = "0.0.0.0:7777"
//! max_sessions = 500
//! checksum = "crc32"
//! cipher_suite = "aes-256-gcm"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wyvern_crypto::{CipherSuite, KEY_LEN, SEAL_OVERHEAD};
use wyvern_protocol::{ChecksumAlgorithm, DEFAULT_MAX_FRAME_LENGTH, FrameCodec};
use wyvern_session::{SEALED_OVERHEAD, SessionConfig};

/// Smallest `max_frame_length` that still fits every handshake body.
pub const MIN_FRAME_LENGTH: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything an operator can tune.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Concurrent sessions; connections beyond this get `ServerFull`.
    pub max_sessions: usize,
    pub handshake_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    /// Largest body a frame may declare.
    pub max_frame_length: usize,
    pub checksum: ChecksumAlgorithm,
    pub cipher_suite: CipherSuite,
    pub max_auth_attempts: u32,
    pub session_id_quarantine_ms: u64,
    /// How long shutdown waits for sessions to say goodbye.
    pub drain_timeout_ms: u64,
    /// Packets queued per session for broadcast before new ones are dropped.
    pub outbound_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7777".to_string(),
            max_sessions: 1024,
            handshake_timeout_ms: 5_000,
            auth_timeout_ms: 15_000,
            idle_timeout_ms: 60_000,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            checksum: ChecksumAlgorithm::Crc32,
            cipher_suite: CipherSuite::ChaCha20Poly1305,
            max_auth_attempts: 3,
            session_id_quarantine_ms: 30_000,
            drain_timeout_ms: 5_000,
            outbound_queue_depth: 64,
        }
    }
}

impl ServerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Rejects settings the server can't run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("max_sessions", self.max_sessions as u64),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("auth_timeout_ms", self.auth_timeout_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("max_auth_attempts", u64::from(self.max_auth_attempts)),
            ("outbound_queue_depth", self.outbound_queue_depth as u64),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }

        let proposal = SEAL_OVERHEAD + KEY_LEN;
        let floor = MIN_FRAME_LENGTH.max(proposal);
        if self.max_frame_length < floor {
            return Err(ConfigError::Invalid(format!(
                "max_frame_length {} is below the handshake minimum of {floor}",
                self.max_frame_length
            )));
        }
        if u32::try_from(self.max_frame_length).is_err() {
            return Err(ConfigError::Invalid(
                "max_frame_length must fit the 32-bit length field".into(),
            ));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            auth_timeout: Duration::from_millis(self.auth_timeout_ms),
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            max_auth_attempts: self.max_auth_attempts,
            id_quarantine: Duration::from_millis(self.session_id_quarantine_ms),
            max_frame_length: self.max_frame_length,
        }
    }

    /// Largest application body that fits in one frame once sealed.
    pub fn max_body_len(&self) -> usize {
        self.max_frame_length.saturating_sub(SEALED_OVERHEAD)
    }

    pub fn frame_codec(&self) -> FrameCodec {
        FrameCodec::new(self.checksum, self.max_frame_length)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial_document_keeps_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            bind_addr = "0.0.0.0:9000"
            max_sessions = 10
            checksum = "fnv1a"
            cipher_suite = "aes-256-gcm"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.max_sessions, 10);
        assert_eq!(config.checksum, ChecksumAlgorithm::Fnv1a);
        assert_eq!(config.cipher_suite, CipherSuite::Aes256Gcm);
        assert_eq!(config.max_auth_attempts, 3);
    }

    #[test]
    fn test_from_toml_unknown_field_rejected() {
        let result = ServerConfig::from_toml("max_sesions = 10");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_toml_unknown_checksum_rejected() {
        let result = ServerConfig::from_toml(r#"checksum = "md5""#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_zero_limit_rejected() {
        let config = ServerConfig {
            max_sessions: 0,
            ..ServerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_sessions"));
    }

    #[test]
    fn test_validate_tiny_frame_limit_rejected() {
        let config = ServerConfig {
            max_frame_length: 64,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = ServerConfig {
            max_frame_length: MIN_FRAME_LENGTH,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_config_converts_millis() {
        let config = ServerConfig {
            idle_timeout_ms: 1_500,
            ..ServerConfig::default()
        };
        assert_eq!(
            config.session_config().idle_timeout,
            Duration::from_millis(1_500)
        );
    }

    #[test]
    fn test_session_config_carries_frame_limit() {
        let config = ServerConfig {
            max_frame_length: 512,
            ..ServerConfig::default()
        };
        assert_eq!(config.session_config().max_frame_length, 512);
        assert_eq!(config.max_body_len(), 512 - SEALED_OVERHEAD);
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let result = ServerConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
