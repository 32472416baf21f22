use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from preview.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PreviewConfig {
    pub server: ServerConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Static-file-server program to run inside the output folder.
    pub command: String,
    /// Arguments; `{port}` and `{directory}` are substituted at launch.
    pub args: Vec<String>,
    pub port: u16,
    /// Name of the generated folder under the site root.
    pub output_folder: String,
    /// Cap on the stderr text kept for failure diagnostics.
    pub max_diagnostic_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait after SIGTERM before escalating to SIGKILL.
    pub grace_period_secs: u64,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec![
                "-m".to_string(),
                "http.server".to_string(),
                "{port}".to_string(),
            ],
            port: 8000,
            output_folder: "Output".to_string(),
            max_diagnostic_bytes: 64 * 1024,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
        }
    }
}

/// Errors raised while loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<PreviewConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(PreviewConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_run_python_http_server() {
        let config = PreviewConfig::default();
        assert_eq!(config.server.command, "python3");
        assert_eq!(config.server.args, vec!["-m", "http.server", "{port}"]);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.output_folder, "Output");
        assert_eq!(config.shutdown.grace_period_secs, 5);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("preview.toml")).unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.toml");
        std::fs::write(&path, "[server]\nport = 9090\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.command, "python3");
        assert_eq!(config.server.output_folder, "Output");
        assert_eq!(config.shutdown.grace_period_secs, 5);
    }

    #[test]
    fn test_custom_server_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.toml");
        std::fs::write(
            &path,
            r#"
[server]
command = "miniserve"
args = ["{directory}", "--port", "{port}"]
output_folder = "public"

[shutdown]
grace_period_secs = 1
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.command, "miniserve");
        assert_eq!(config.server.args, vec!["{directory}", "--port", "{port}"]);
        assert_eq!(config.server.output_folder, "public");
        assert_eq!(config.shutdown.grace_period_secs, 1);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.toml");
        std::fs::write(&path, "[server]\nport = \"eighty\"\n").unwrap();

        assert!(matches!(
            load_config(&path).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }
}
