use clap::Parser;
use regex::Regex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuration errors:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Command-line flags. Every flag overrides the matching config file value.
#[derive(Debug, Default, Parser)]
#[command(name = "routegate", version, about = "Reverse-proxy configuration reconciler")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "ROUTEGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Regex for the container names that should be signaled to reload configs
    #[arg(long, env = "ROUTEGATE_REGEX")]
    pub regex: Option<String>,

    /// Docker endpoint (unix:///path or tcp://host:port)
    #[arg(long, env = "ROUTEGATE_DOCKER_ENDPOINT")]
    pub docker_endpoint: Option<String>,

    /// Path to the proxy config template
    #[arg(long, env = "ROUTEGATE_TEMPLATE")]
    pub template: Option<PathBuf>,

    /// Directory that holds the generated configs
    #[arg(long, env = "ROUTEGATE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Listen address for the API
    #[arg(long, env = "ROUTEGATE_LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// TLS certificate (PEM); requires --ssl-key
    #[arg(long, env = "ROUTEGATE_SSL_CERT")]
    pub ssl_cert: Option<PathBuf>,

    /// TLS private key (PEM); requires --ssl-cert
    #[arg(long, env = "ROUTEGATE_SSL_KEY")]
    pub ssl_key: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub docker: DockerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Path to TLS certificate file (PEM format)
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key file (PEM format)
    pub tls_key: Option<PathBuf>,
}

impl ServerConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconcilerConfig {
    /// Directory the records and rendered configs are written to
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Template used to render each record
    #[serde(default = "default_template")]
    pub template: PathBuf,

    /// Regex selecting the containers to signal; empty signals all of them
    #[serde(default)]
    pub name_pattern: String,

    #[serde(default = "default_record_extension")]
    pub record_extension: String,

    #[serde(default = "default_artifact_extension")]
    pub artifact_extension: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            template: default_template(),
            name_pattern: String::new(),
            record_extension: default_record_extension(),
            artifact_extension: default_artifact_extension(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DockerConfig {
    /// Docker API endpoint; empty uses DOCKER_HOST or the local socket
    #[serde(default = "default_docker_endpoint")]
    pub endpoint: String,

    /// Signal sent to matching containers (default: SIGHUP)
    #[serde(default = "default_signal")]
    pub signal: String,

    /// Request timeout for Docker API calls
    #[serde(default = "default_docker_timeout")]
    pub timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_docker_endpoint(),
            signal: default_signal(),
            timeout_secs: default_docker_timeout(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/nginx/conf.d")
}

fn default_template() -> PathBuf {
    PathBuf::from("default-template.tmpl")
}

fn default_record_extension() -> String {
    "json".to_string()
}

fn default_artifact_extension() -> String {
    "conf".to_string()
}

fn default_docker_endpoint() -> String {
    "unix:///var/run/docker.sock".to_string()
}

fn default_signal() -> String {
    "SIGHUP".to_string()
}

fn default_docker_timeout() -> u64 {
    120
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the config file named on the command line (if any), apply the
    /// flag overrides and validate the result
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(regex) = &cli.regex {
            self.reconciler.name_pattern = regex.clone();
        }
        if let Some(endpoint) = &cli.docker_endpoint {
            self.docker.endpoint = endpoint.clone();
        }
        if let Some(template) = &cli.template {
            self.reconciler.template = template.clone();
        }
        if let Some(dir) = &cli.config_dir {
            self.reconciler.config_dir = dir.clone();
        }
        if let Some(addr) = &cli.listen_addr {
            self.server.listen_addr = addr.clone();
        }
        if let Some(cert) = &cli.ssl_cert {
            self.server.tls_cert = Some(cert.clone());
        }
        if let Some(key) = &cli.ssl_key {
            self.server.tls_key = Some(key.clone());
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen_addr.parse().map_err(|e| {
            ConfigError::Invalid(vec![format!(
                "invalid listen address '{}': {}",
                self.server.listen_addr, e
            )])
        })
    }

    /// Validate all configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        match (&self.server.tls_cert, &self.server.tls_key) {
            (Some(_), None) => errors.push("--ssl-key is required with --ssl-cert".to_string()),
            (None, Some(_)) => errors.push("--ssl-cert is required with --ssl-key".to_string()),
            _ => {}
        }

        if let Err(e) = self.server.listen_addr.parse::<SocketAddr>() {
            errors.push(format!(
                "invalid listen address '{}': {}",
                self.server.listen_addr, e
            ));
        }

        if let Err(e) = Regex::new(&self.reconciler.name_pattern) {
            errors.push(format!(
                "invalid container name pattern '{}': {}",
                self.reconciler.name_pattern, e
            ));
        }

        let reconciler = &self.reconciler;
        if reconciler.record_extension.is_empty() || reconciler.artifact_extension.is_empty() {
            errors.push("record_extension and artifact_extension must not be empty".to_string());
        } else if reconciler.record_extension == reconciler.artifact_extension {
            errors.push(format!(
                "record_extension and artifact_extension are both '{}'",
                reconciler.record_extension
            ));
        }

        if self.docker.signal.is_empty() {
            errors.push("docker signal must not be empty".to_string());
        }
        if self.docker.timeout_secs == 0 {
            errors.push("docker timeout_secs must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
listen_addr = "127.0.0.1:9000"
tls_cert = "/etc/ssl/api.crt"
tls_key = "/etc/ssl/api.key"

[reconciler]
config_dir = "/srv/nginx"
template = "/srv/templates/site.tmpl"
name_pattern = "^edge-"

[docker]
endpoint = "tcp://docker:2375"
signal = "SIGUSR1"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert!(config.server.tls_enabled());
        assert_eq!(config.reconciler.config_dir, PathBuf::from("/srv/nginx"));
        assert_eq!(config.reconciler.name_pattern, "^edge-");
        assert_eq!(config.reconciler.record_extension, "json");
        assert_eq!(config.docker.signal, "SIGUSR1");
        assert_eq!(config.docker.timeout_secs, 120);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert!(!config.server.tls_enabled());
        assert_eq!(config.reconciler.config_dir, PathBuf::from("/etc/nginx/conf.d"));
        assert_eq!(config.reconciler.template, PathBuf::from("default-template.tmpl"));
        assert_eq!(config.reconciler.name_pattern, "");
        assert_eq!(config.reconciler.artifact_extension, "conf");
        assert_eq!(config.docker.endpoint, "unix:///var/run/docker.sock");
        assert_eq!(config.docker.signal, "SIGHUP");
        config.validate().unwrap();
    }

    #[test]
    fn test_tls_pair_is_both_or_neither() {
        let mut config = Config::default();
        config.server.tls_cert = Some(PathBuf::from("cert.pem"));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("--ssl-key is required with --ssl-cert"));

        let mut config = Config::default();
        config.server.tls_key = Some(PathBuf::from("key.pem"));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("--ssl-cert is required with --ssl-key"));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.server.listen_addr = "not-an-addr".to_string();
        config.reconciler.name_pattern = "web-(".to_string();
        config.reconciler.artifact_extension = "json".to_string();
        config.docker.timeout_secs = 0;

        match config.validate().unwrap_err() {
            ConfigError::Invalid(errors) => assert_eq!(errors.len(), 4),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("routegate.toml");
        std::fs::write(
            &path,
            "[reconciler]\nname_pattern = \"^old\"\nconfig_dir = \"/old\"\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "routegate",
            "--config",
            path.to_str().unwrap(),
            "--regex",
            "^web-",
            "--listen-addr",
            "127.0.0.1:9090",
        ]);
        let config = Config::from_cli(&cli).unwrap();

        assert_eq!(config.reconciler.name_pattern, "^web-");
        assert_eq!(config.reconciler.config_dir, PathBuf::from("/old"));
        assert_eq!(config.listen_addr().unwrap().port(), 9090);
    }

    #[test]
    fn test_cli_rejects_half_tls_pair() {
        let cli = Cli {
            ssl_cert: Some(PathBuf::from("cert.pem")),
            ..Default::default()
        };
        assert!(matches!(Config::from_cli(&cli), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/routegate.toml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
