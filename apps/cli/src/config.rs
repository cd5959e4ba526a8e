//! Deploy configuration.
//!
//! Stored as TOML, `./treepush.toml` by default. Secrets are never read
//! from the file: the password comes from `TREEPUSH_PASSWORD` and a key
//! passphrase from `TREEPUSH_KEY_PASSPHRASE`.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use treepush_engine::{
    Credentials, DEFAULT_EXCLUDES, DEFAULT_MAX_WORKERS, DEFAULT_PORT, DeployConfig, ExcludeSet,
    RemoteTarget,
};

/// Default configuration file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "treepush.toml";

pub const PASSWORD_ENV: &str = "TREEPUSH_PASSWORD";
pub const PASSPHRASE_ENV: &str = "TREEPUSH_KEY_PASSPHRASE";

/// How the remote store is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Sftp,
    /// The remote root lives on a locally mounted filesystem.
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    /// Local build output to upload.
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    /// Remote directory receiving the contents of `local_dir`.
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,

    /// Upper bound on concurrent upload channels.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Directory names never uploaded.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,

    #[serde(default)]
    pub use_agent: bool,

    #[serde(default)]
    pub transport: Transport,

    /// Mount point used as the remote root when `transport = "local"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_store: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_remote_dir() -> String {
    ".".into()
}

fn default_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_true() -> bool {
    true
}

fn default_exclude() -> Vec<String> {
    DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            local_dir: default_local_dir(),
            remote_dir: default_remote_dir(),
            workers: default_workers(),
            parallel: default_true(),
            exclude: default_exclude(),
            key_file: None,
            use_agent: false,
            transport: Transport::default(),
            local_store: None,
        }
    }
}

impl Config {
    /// Loads `path`, or the default file if present, or built-in defaults.
    ///
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if required {
                bail!("config file not found: {}", path.display());
            }
            tracing::debug!("no config file, using defaults");
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Writes the configuration as TOML, refusing to clobber unless `force`.
    pub fn save(&self, path: &Path, force: bool) -> anyhow::Result<()> {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Picks credentials: key file, then agent, then password from the environment.
    pub fn credentials(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Credentials> {
        if let Some(path) = &self.key_file {
            return Ok(Credentials::KeyFile {
                path: path.clone(),
                passphrase: env(PASSPHRASE_ENV),
            });
        }
        if self.use_agent {
            return Ok(Credentials::Agent);
        }
        match env(PASSWORD_ENV) {
            Some(password) => Ok(Credentials::Password(password)),
            None => bail!(
                "no credentials: set {PASSWORD_ENV}, configure key_file, or enable use_agent"
            ),
        }
    }

    /// Validates and converts into the engine's configuration.
    pub fn to_deploy_config(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<DeployConfig> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }

        let target = match self.transport {
            Transport::Sftp => {
                if self.host.is_empty() {
                    bail!("host is required for the sftp transport");
                }
                if self.username.is_empty() {
                    bail!("username is required for the sftp transport");
                }
                RemoteTarget {
                    host: self.host.clone(),
                    port: self.port,
                    username: self.username.clone(),
                    credentials: self.credentials(env)?,
                }
            }
            Transport::Local => {
                let store = self
                    .local_store
                    .as_ref()
                    .context("local_store is required for the local transport")?;
                RemoteTarget {
                    host: store.display().to_string(),
                    port: 0,
                    username: String::new(),
                    credentials: Credentials::Agent,
                }
            }
        };

        Ok(DeployConfig {
            local_root: self.local_dir.clone(),
            remote_root: self.remote_dir.clone(),
            target,
            max_workers: self.workers,
            exclude: ExcludeSet::new(self.exclude.iter().cloned()),
            parallel: self.parallel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn sftp_config() -> Config {
        Config {
            host: "1ink.us".into(),
            username: "deploy".into(),
            remote_dir: "go.1ink.us".into(),
            ..Config::default()
        }
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.port, 22);
        assert_eq!(config.local_dir, PathBuf::from("dist"));
        assert_eq!(config.workers, 10);
        assert!(config.parallel);
        assert!(config.exclude.contains(&".git".to_string()));
        assert_eq!(config.transport, Transport::Sftp);
    }

    #[test]
    fn config_partial_toml() {
        // Only specify host, rest should use defaults.
        let config: Config = toml::from_str(r#"host = "example.com""#).unwrap();
        assert_eq!(config.host, "example.com");
        assert_eq!(config.port, 22);
        assert_eq!(config.workers, 10);
        assert_eq!(config.remote_dir, ".");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            workers: 4,
            parallel: false,
            key_file: Some(PathBuf::from("/home/me/.ssh/id_ed25519")),
            transport: Transport::Sftp,
            ..sftp_config()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn transport_parses_lowercase() {
        let config: Config = toml::from_str(
            "transport = \"local\"\nlocal_store = \"/mnt/www\"",
        )
        .unwrap();
        assert_eq!(config.transport, Transport::Local);
        assert_eq!(config.local_store, Some(PathBuf::from("/mnt/www")));
    }

    #[test]
    fn password_from_env() {
        let creds = sftp_config()
            .credentials(|k| (k == PASSWORD_ENV).then(|| "s3cret".to_string()))
            .unwrap();
        assert_eq!(creds, Credentials::Password("s3cret".into()));
    }

    #[test]
    fn key_file_wins_over_password() {
        let config = Config {
            key_file: Some(PathBuf::from("id_rsa")),
            ..sftp_config()
        };
        let creds = config
            .credentials(|k| match k {
                PASSWORD_ENV => Some("pw".into()),
                PASSPHRASE_ENV => Some("phrase".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            creds,
            Credentials::KeyFile {
                path: PathBuf::from("id_rsa"),
                passphrase: Some("phrase".into()),
            }
        );
    }

    #[test]
    fn missing_credentials_is_an_error() {
        assert!(sftp_config().credentials(no_env).is_err());

        let agent = Config {
            use_agent: true,
            ..sftp_config()
        };
        assert_eq!(agent.credentials(no_env).unwrap(), Credentials::Agent);
    }

    #[test]
    fn sftp_requires_host_and_user() {
        let config = Config {
            use_agent: true,
            ..Config::default()
        };
        assert!(config.to_deploy_config(no_env).is_err());
    }

    #[test]
    fn local_transport_requires_store() {
        let config = Config {
            transport: Transport::Local,
            ..Config::default()
        };
        assert!(config.to_deploy_config(no_env).is_err());

        let config = Config {
            transport: Transport::Local,
            local_store: Some(PathBuf::from("/mnt/www")),
            ..Config::default()
        };
        let deploy = config.to_deploy_config(no_env).unwrap();
        assert_eq!(deploy.target.host, "/mnt/www");
    }

    #[test]
    fn deploy_config_conversion() {
        let config = Config {
            use_agent: true,
            exclude: vec![".git".into(), "node_modules".into()],
            ..sftp_config()
        };
        let deploy = config.to_deploy_config(no_env).unwrap();
        assert_eq!(deploy.remote_root, "go.1ink.us");
        assert_eq!(deploy.max_workers, 10);
        assert!(deploy.exclude.contains("node_modules"));
        assert!(!deploy.exclude.contains(".svn"));
        assert_eq!(deploy.target.port, 22);
    }

    #[test]
    fn zero_workers_rejected() {
        let config = Config {
            workers: 0,
            use_agent: true,
            ..sftp_config()
        };
        assert!(config.to_deploy_config(no_env).is_err());
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("treepush.toml");

        let config = sftp_config();
        config.save(&path, false).unwrap();
        assert!(config.save(&path, false).is_err());
        config.save(&path, true).unwrap();

        let loaded = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(tmp.path().join("nope.toml").as_path())).is_err());
    }
}
