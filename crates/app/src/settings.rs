// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;

use bon::Builder;
use config::{Config, ConfigError, Environment, File, FileFormat};
use pmq_common_telemetry::LoggingOptions;
use pmq_server::ServerConfig;
use serde::{Deserialize, Serialize};

const BASE_CONFIG: &str = include_str!("../config/default.toml");

/// Prefix of environment overrides, e.g. `PMQ__SERVER__MAX_SEGMENT_SIZE`.
pub const ENV_PREFIX: &str = "PMQ";
const ENV_SEPARATOR: &str = "__";

/// Configuration for the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default, Builder)]
#[serde(default)]
pub struct AppConfig {
    #[builder(default)]
    pub server:  ServerConfig,
    #[builder(default)]
    pub logging: LoggingOptions,
}

impl AppConfig {
    /// Load the built-in defaults, then `path` if given, then `PMQ__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::from_str(BASE_CONFIG, FileFormat::Toml));

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::Message(format!(
                    "Config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_builtin_defaults_match_code_defaults() {
        let loaded = AppConfig::load(None).unwrap();
        assert_eq!(loaded.server, ServerConfig::default());
        assert_eq!(loaded.logging.dir, "logs");
        assert_eq!(loaded.logging.max_log_files, 720);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pmq.toml");
        std::fs::write(
            &path,
            r#"
[server]
segments_root = "/var/lib/pmq/segments"
max_segment_size = 4096
consumer_index_sync_interval = "250ms"

[logging]
level = "debug,queue=trace"
log_format = "json"
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(
            config.server.segments_root.to_str(),
            Some("/var/lib/pmq/segments")
        );
        assert_eq!(config.server.max_segment_size, 4096);
        assert_eq!(
            config.server.consumer_index_sync_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.server.delivery_buffer, 1024);
        assert_eq!(config.logging.level.as_deref(), Some("debug,queue=trace"));
        assert_eq!(
            config.logging.log_format,
            pmq_common_telemetry::LogFormat::Json
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = AppConfig::load(Some(&temp_dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
