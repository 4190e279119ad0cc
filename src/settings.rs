//! Server settings.
//!
//! Layered with the `config` crate, later sources winning:
//!
//! | Source                          | Example                               |
//! |---------------------------------|---------------------------------------|
//! | built-in defaults               | `listen_addr = "0.0.0.0:8421"`        |
//! | optional TOML file              | `db_path = "/var/lib/voxel/world.db"` |
//! | `VOXEL_HUB_*` environment       | `VOXEL_HUB_NOTIFY_QUEUE_DEPTH=512`    |
//!
//! Command-line flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// World file; empty keeps the world in memory only.
    pub db_path: String,
    pub notify_queue_depth: usize,
    /// Streams a peer may open on its connection.
    pub max_streams: usize,
    /// Longest RPC record accepted, in bytes.
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8421".to_string(),
            db_path: "world.db".to_string(),
            notify_queue_depth: 256,
            max_streams: 8,
            max_frame_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub const ENV_PREFIX: &'static str = "VOXEL_HUB";

    /// Defaults, then `file` if given and present, then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let settings: Self = builder
            .add_source(::config::Environment::with_prefix(Self::ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.listen_addr.is_empty() {
            return Err(SettingsError::Invalid {
                key: "listen_addr",
                reason: "must not be empty".into(),
            });
        }
        if self.notify_queue_depth == 0 {
            return Err(SettingsError::Invalid {
                key: "notify_queue_depth",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_streams < 2 {
            return Err(SettingsError::Invalid {
                key: "max_streams",
                reason: format!("{} is below the 2 streams a tunnel uses", self.max_streams),
            });
        }
        if self.max_frame_size == 0 {
            return Err(SettingsError::Invalid {
                key: "max_frame_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    #[cfg(feature = "server")]
    pub fn tunnel(&self) -> crate::tunnel::TunnelConfig {
        crate::tunnel::TunnelConfig {
            max_streams: self.max_streams,
            notify_queue_depth: self.notify_queue_depth,
            max_line: self.max_frame_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.notify_queue_depth, 256);
    }

    #[test]
    fn zero_queue_depth_is_rejected() {
        let config = ServerConfig {
            notify_queue_depth: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SettingsError::Invalid {
                key: "notify_queue_depth",
                ..
            })
        ));
    }

    #[test]
    fn single_stream_limit_is_rejected() {
        let config = ServerConfig {
            max_streams: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SettingsError::Invalid {
                key: "max_streams",
                ..
            })
        ));
    }
}
