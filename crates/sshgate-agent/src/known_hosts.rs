//! OpenSSH `known_hosts` parsing.
//!
//! Only what the agent needs to refuse unknown servers: host patterns with
//! `*`/`?` wildcards, `!` negation, `[host]:port` names, hashed (`|1|...`)
//! names and the `@cert-authority`/`@revoked` markers.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::io;
use std::path::Path;

type HmacSha1 = Hmac<Sha1>;

const HASHED_PREFIX: &str = "|1|";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    CertAuthority,
    Revoked,
}

/// The host field of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMatcher {
    /// Comma-separated patterns, possibly negated with `!`.
    Patterns(Vec<String>),
    /// `|1|salt|hash`: HMAC-SHA1 of the host name keyed by the salt.
    Hashed { salt: Vec<u8>, digest: Vec<u8> },
}

impl HostMatcher {
    fn parse(field: &str) -> Option<Self> {
        let Some(hashed) = field.strip_prefix(HASHED_PREFIX) else {
            return Some(HostMatcher::Patterns(
                field
                    .split(',')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
            ));
        };
        let (salt, digest) = hashed.split_once('|')?;
        let b64 = base64::engine::general_purpose::STANDARD;
        Some(HostMatcher::Hashed {
            salt: b64.decode(salt).ok()?,
            digest: b64.decode(digest).ok()?,
        })
    }

    /// For patterns: `name` matches a positive pattern and no negated one.
    fn matches(&self, name: &str) -> bool {
        match self {
            HostMatcher::Patterns(patterns) => {
                let mut matched = false;
                for pattern in patterns {
                    match pattern.strip_prefix('!') {
                        Some(negated) if glob_match(negated, name) => return false,
                        Some(_) => {}
                        None if glob_match(pattern, name) => matched = true,
                        None => {}
                    }
                }
                matched
            }
            HostMatcher::Hashed { salt, digest } => {
                let Ok(mut mac) = HmacSha1::new_from_slice(salt) else {
                    return false;
                };
                mac.update(name.to_ascii_lowercase().as_bytes());
                mac.verify_slice(digest).is_ok()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHostEntry {
    pub marker: Option<Marker>,
    pub hosts: HostMatcher,
    pub key_type: String,
    /// Base64 key blob, kept as text.
    pub key: String,
}

impl KnownHostEntry {
    fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut fields = line.split_whitespace();
        let mut first = fields.next()?;
        let marker = match first {
            "@cert-authority" => Some(Marker::CertAuthority),
            "@revoked" => Some(Marker::Revoked),
            m if m.starts_with('@') => return None,
            _ => None,
        };
        if marker.is_some() {
            first = fields.next()?;
        }

        let hosts = HostMatcher::parse(first)?;
        let key_type = fields.next()?.to_string();
        let key = fields.next()?.to_string();

        Some(Self {
            marker,
            hosts,
            key_type,
            key,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.hosts.matches(name)
    }
}

/// Parsed known-hosts data.
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    entries: Vec<KnownHostEntry>,
}

impl KnownHosts {
    pub fn parse(text: &str) -> Self {
        Self {
            entries: text.lines().filter_map(KnownHostEntry::parse_line).collect(),
        }
    }

    pub async fn load(path: &Path) -> io::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::parse(&text))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Host keys trusted for `name` (`host`, or `[host]:port` off port 22).
    ///
    /// Empty if any revoked entry matches the host.
    pub fn host_keys(&self, name: &str) -> Vec<KnownHostEntry> {
        let matching: Vec<&KnownHostEntry> =
            self.entries.iter().filter(|e| e.matches(name)).collect();
        if matching.iter().any(|e| e.marker == Some(Marker::Revoked)) {
            return Vec::new();
        }
        matching.into_iter().cloned().collect()
    }
}

/// OpenSSH-style wildcard match: `*` is any run, `?` is one character.
/// Hostnames compare case-insensitively.
fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let name: Vec<char> = name.to_ascii_lowercase().chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    n = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
