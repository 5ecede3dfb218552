use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STATE_DIR: &str = ".local/state/sshgate";
const POLICY_FILE: &str = "policy.json";
const DEFAULT_MAX_CONNECTIONS: usize = 64;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Settings as written in `config.toml`. Every key is optional.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub listen_port: Option<u16>,
    pub bind_address: Option<IpAddr>,
    pub known_hosts: Option<PathBuf>,
    pub policy_path: Option<PathBuf>,
    pub auth_sock: Option<PathBuf>,
    pub max_connections: Option<usize>,
    pub shutdown_grace_secs: Option<u64>,
}

/// Values given on the command line; these win over the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen_port: Option<u16>,
    pub bind_address: Option<IpAddr>,
    pub known_hosts: Option<PathBuf>,
    pub policy_path: Option<PathBuf>,
    pub auth_sock: Option<PathBuf>,
    pub max_connections: Option<usize>,
}

/// Resolved agent configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub listen_port: u16,
    pub bind_address: IpAddr,
    pub known_hosts: PathBuf,
    pub policy_path: PathBuf,
    pub auth_sock: Option<PathBuf>,
    pub max_connections: usize,
    pub shutdown_grace: Duration,
}

impl AgentConfig {
    /// Load from `path`, or from the default location if `None`. A missing
    /// default file means defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let file = match path {
            Some(path) => Some(read_file_config(path)?),
            None => match config_path(&env) {
                Some(path) if path.exists() => Some(read_file_config(&path)?),
                _ => None,
            },
        };
        Self::resolve(file.unwrap_or_default(), overrides, env)
    }

    /// Merge file settings, overrides and defaults. `env` looks up
    /// environment variables.
    pub fn resolve<F>(file: FileConfig, overrides: &Overrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = env("HOME").map(PathBuf::from);

        let known_hosts = match overrides.known_hosts.clone().or(file.known_hosts) {
            Some(path) => path,
            None => home
                .as_ref()
                .map(|h| h.join(".ssh").join("known_hosts"))
                .context("HOME env var not set; pass --known-hosts")?,
        };
        let policy_path = match overrides.policy_path.clone().or(file.policy_path) {
            Some(path) => path,
            None => default_state_dir(&env)
                .context("HOME env var not set; pass --policy")?
                .join(POLICY_FILE),
        };
        let auth_sock = overrides
            .auth_sock
            .clone()
            .or(file.auth_sock)
            .or_else(|| env("SSH_AUTH_SOCK").map(PathBuf::from));

        let max_connections = overrides
            .max_connections
            .or(file.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        if max_connections == 0 {
            bail!("max_connections must be at least 1");
        }

        Ok(Self {
            listen_port: overrides
                .listen_port
                .or(file.listen_port)
                .unwrap_or(sshgate::DEFAULT_LISTEN_PORT),
            bind_address: overrides
                .bind_address
                .or(file.bind_address)
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            known_hosts,
            policy_path,
            auth_sock,
            max_connections,
            shutdown_grace: Duration::from_secs(
                file.shutdown_grace_secs
                    .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
            ),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.listen_port)
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))
}

/// `$XDG_CONFIG_HOME/sshgate/config.toml`, falling back to `~/.config`.
fn config_path(env: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(dir) = env("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(dir).join("sshgate").join("config.toml"));
    }
    env("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("sshgate")
            .join("config.toml")
    })
}

/// Priority: `$SSHGATE_STATE_DIR`, then `~/.local/state/sshgate`.
fn default_state_dir(env: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(dir) = env("SSHGATE_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    env("HOME").map(|home| PathBuf::from(home).join(DEFAULT_STATE_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = AgentConfig::resolve(
            FileConfig::default(),
            &Overrides::default(),
            env_of(&[("HOME", "/home/alice"), ("SSH_AUTH_SOCK", "/tmp/agent.sock")]),
        )
        .unwrap();

        assert_eq!(config.listen_port, 2345);
        assert_eq!(config.listen_addr().to_string(), "127.0.0.1:2345");
        assert_eq!(
            config.known_hosts,
            PathBuf::from("/home/alice/.ssh/known_hosts")
        );
        assert_eq!(
            config.policy_path,
            PathBuf::from("/home/alice/.local/state/sshgate/policy.json")
        );
        assert_eq!(config.auth_sock, Some(PathBuf::from("/tmp/agent.sock")));
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn state_dir_env_moves_policy() {
        let config = AgentConfig::resolve(
            FileConfig::default(),
            &Overrides::default(),
            env_of(&[("HOME", "/home/alice"), ("SSHGATE_STATE_DIR", "/var/lib/sshgate")]),
        )
        .unwrap();
        assert_eq!(
            config.policy_path,
            PathBuf::from("/var/lib/sshgate/policy.json")
        );
        assert_eq!(config.auth_sock, None);
    }

    #[test]
    fn toml_then_flags() {
        let file: FileConfig = toml::from_str(
            r#"
            listen_port = 2400
            bind_address = "0.0.0.0"
            known_hosts = "/etc/ssh/ssh_known_hosts"
            max_connections = 8
            shutdown_grace_secs = 1
            "#,
        )
        .unwrap();
        let overrides = Overrides {
            listen_port: Some(2500),
            ..Overrides::default()
        };

        let config = AgentConfig::resolve(file, &overrides, env_of(&[("HOME", "/root")])).unwrap();
        assert_eq!(config.listen_port, 2500);
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:2500");
        assert_eq!(
            config.known_hosts,
            PathBuf::from("/etc/ssh/ssh_known_hosts")
        );
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.shutdown_grace, Duration::from_secs(1));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<FileConfig>("listen_prot = 1").is_err());
    }

    #[test]
    fn zero_connections_is_invalid() {
        let overrides = Overrides {
            max_connections: Some(0),
            ..Overrides::default()
        };
        assert!(
            AgentConfig::resolve(FileConfig::default(), &overrides, env_of(&[("HOME", "/")]))
                .is_err()
        );
    }

    #[test]
    fn missing_home_needs_explicit_paths() {
        assert!(
            AgentConfig::resolve(FileConfig::default(), &Overrides::default(), env_of(&[]))
                .is_err()
        );

        let overrides = Overrides {
            known_hosts: Some("/kh".into()),
            policy_path: Some("/policy.json".into()),
            ..Overrides::default()
        };
        let config = AgentConfig::resolve(FileConfig::default(), &overrides, env_of(&[])).unwrap();
        assert_eq!(config.policy_path, PathBuf::from("/policy.json"));
    }

    #[test]
    fn explicit_config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "listen_port = 2999\nknown_hosts = \"/kh\"\npolicy_path = \"/p.json\"\n",
        )
        .unwrap();
        let config = AgentConfig::load(Some(&path), &Overrides::default()).unwrap();
        assert_eq!(config.listen_port, 2999);

        let absent = dir.path().join("absent.toml");
        assert!(AgentConfig::load(Some(&absent), &Overrides::default()).is_err());
    }
}
