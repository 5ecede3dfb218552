use serde::{Deserialize, Serialize};
use sshgate::{AgentForwardingNotice, ExecutionRequest};
use std::fmt;

const DEFAULT_SSH_PORT: u16 = 22;

/// Host name recorded for requests made on this machine.
pub const LOCAL_CLIENT_HOST: &str = "localhost";

/// The endpoint a request comes from.
///
/// Forwarded connections name it in their [`AgentForwardingNotice`]. A
/// connection without one was made on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEndpoint {
    pub username: String,
    pub hostname: String,
    pub port: u32,
}

impl ClientEndpoint {
    pub fn local(username: &str) -> Self {
        Self {
            username: username.to_string(),
            hostname: LOCAL_CLIENT_HOST.to_string(),
            port: 0,
        }
    }
}

impl From<AgentForwardingNotice> for ClientEndpoint {
    fn from(notice: AgentForwardingNotice) -> Self {
        Self {
            username: notice.username,
            hostname: notice.hostname,
            port: notice.port,
        }
    }
}

impl fmt::Display for ClientEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.hostname, self.port)
    }
}

/// A trust relationship approvals are keyed by.
///
/// Field names are PascalCase on disk to match store files written by
/// earlier releases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Scope {
    pub client_username: String,
    pub client_hostname: String,
    pub client_port: u32,
    pub service_username: String,
    pub service_hostname: String,
}

impl Scope {
    /// Scope for `req` arriving from `client`. The service side is the
    /// account and host the request logs into.
    pub fn new(client: &ClientEndpoint, req: &ExecutionRequest) -> Self {
        Self {
            client_username: client.username.clone(),
            client_hostname: client.hostname.clone(),
            client_port: client.port,
            service_username: req.user.clone(),
            service_hostname: ServerAddr::parse(&req.server).host,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{} -> {}@{}",
            self.client_username,
            self.client_hostname,
            self.client_port,
            self.service_username,
            self.service_hostname
        )
    }
}

/// Commands approved for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rule {
    pub all_commands: bool,
    /// Insertion-ordered, never holds duplicates.
    #[serde(default, deserialize_with = "dedup_commands")]
    pub commands: Vec<String>,
}

impl Rule {
    pub fn is_approved(&self, command: &str) -> bool {
        self.all_commands || self.commands.iter().any(|c| c == command)
    }

    /// Add `command`. Returns false if it was already present.
    pub fn allow_command(&mut self, command: &str) -> bool {
        if self.commands.iter().any(|c| c == command) {
            return false;
        }
        self.commands.push(command.to_string());
        true
    }
}

fn dedup_commands<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // Older writers could emit `null` for an empty list.
    let raw: Option<Vec<String>> = Option::deserialize(deserializer)?;
    let mut commands: Vec<String> = Vec::new();
    for command in raw.unwrap_or_default() {
        if !commands.contains(&command) {
            commands.push(command);
        }
    }
    Ok(commands)
}

/// `host[:port]` as carried in an execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl ServerAddr {
    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`. A port that does not
    /// parse leaves the whole string as the host.
    pub fn parse(server: &str) -> Self {
        let fallback = || Self {
            host: server.to_string(),
            port: DEFAULT_SSH_PORT,
        };

        if let Some(rest) = server.strip_prefix('[') {
            let Some((host, tail)) = rest.split_once(']') else {
                return fallback();
            };
            let port = match tail.strip_prefix(':') {
                Some(p) => match p.parse() {
                    Ok(port) => port,
                    Err(_) => return fallback(),
                },
                None if tail.is_empty() => DEFAULT_SSH_PORT,
                None => return fallback(),
            };
            return Self {
                host: host.to_string(),
                port,
            };
        }

        match server.rsplit_once(':') {
            // A bare IPv6 literal has several colons and no port.
            Some((host, _)) if host.contains(':') => fallback(),
            Some((host, port)) => match port.parse() {
                Ok(port) => Self {
                    host: host.to_string(),
                    port,
                },
                Err(_) => fallback(),
            },
            None => fallback(),
        }
    }

    /// Name used for this endpoint in known-hosts data.
    pub fn known_hosts_name(&self) -> String {
        if self.port == DEFAULT_SSH_PORT {
            self.host.clone()
        } else {
            format!("[{}]:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
