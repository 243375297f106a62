//! Configuration for the exporter.

use serde::{Deserialize, Serialize};

use optiwatch_common::config::LoggingConfig;
use optiwatch_common::error::Result;

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Dial-out ingest settings.
    #[serde(default)]
    pub dialout: DialoutConfig,

    /// HTTP scrape/probe settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Dial-out ingest listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialoutConfig {
    /// Address to listen on for dial-out connections (default: "0.0.0.0:8888").
    #[serde(default = "default_dialout_listen")]
    pub listen: String,

    /// Maximum number of concurrent dial-out connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum accepted frame size in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_dialout_listen() -> String {
    "0.0.0.0:8888".to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_max_frame_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for DialoutConfig {
    fn default() -> Self {
        Self {
            listen: default_dialout_listen(),
            max_connections: default_max_connections(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on for scrapes and probes (default: "0.0.0.0:9908").
    #[serde(default = "default_http_listen")]
    pub listen: String,
}

fn default_http_listen() -> String {
    "0.0.0.0:9908".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file(path: &str) -> Result<Self> {
        optiwatch_common::config::load_config(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optiwatch_common::config::{LogFormat, parse_config};

    #[test]
    fn test_default_config() {
        let config: ExporterConfig = parse_config("{}").unwrap();

        assert_eq!(config.dialout.listen, "0.0.0.0:8888");
        assert_eq!(config.dialout.max_connections, 100);
        assert_eq!(config.dialout.max_frame_bytes, 4 * 1024 * 1024);
        assert_eq!(config.http.listen, "0.0.0.0:9908");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_config() {
        let json5 = r#"
        {
            dialout: {
                listen: "127.0.0.1:18888",
                max_connections: 10,
            },
            http: {
                listen: "127.0.0.1:19908",
            },
            logging: {
                level: "debug",
            },
        }
        "#;

        let config: ExporterConfig = parse_config(json5).unwrap();
        assert_eq!(config.dialout.listen, "127.0.0.1:18888");
        assert_eq!(config.dialout.max_connections, 10);
        assert_eq!(config.http.listen, "127.0.0.1:19908");
        assert_eq!(config.logging.level, "debug");
    }
}
