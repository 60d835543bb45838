//! Out-of-band secrets for the source of truth.
//!
//! Secrets never live in the tracked orchestrators file. They come from a
//! `key=value` `.env` file next to it, overridden by process environment
//! variables of the same name. Both are re-read on every lookup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ConfigError, Result, SyncError};

/// Secret names tried in order.
pub const TOKEN_SECRET_KEYS: &[&str] = &[
    "PVE_TOKEN_SECRET_READ",
    "PROXMOX_TOKEN_SECRET",
    "PVE_TOKEN_SECRET",
];

const OVERRIDABLE_KEYS: &[&str] = &[
    "PVE_TOKEN_SECRET_READ",
    "PROXMOX_TOKEN_SECRET",
    "PVE_TOKEN_SECRET",
    "PVE_HOST",
    "PVE_PORT",
    "PVE_API_USER",
    "PVE_TOKEN_NAME",
    "PVE_VERIFY_SSL",
];

/// A resolved set of key/value secrets.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    vars: BTreeMap<String, String>,
}

impl Secrets {
    /// Parse `.env` contents; blank lines and `#` comments are skipped.
    pub fn parse_env_file(text: &str) -> Self {
        let vars = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Self { vars }
    }

    /// Layer overrides on top; later values win.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in overrides {
            self.vars.insert(k.into(), v.into());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Connection parameters for the Proxmox API; fails closed without a token secret.
    pub fn pve_credentials(&self) -> Result<PveCredentials> {
        let secret = TOKEN_SECRET_KEYS
            .iter()
            .find_map(|k| self.get(k))
            .ok_or_else(|| SyncError::MissingSecret {
                checked: TOKEN_SECRET_KEYS.join(", "),
            })?;

        let port = match self.get("PVE_PORT") {
            Some(p) => p.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PVE_PORT",
                value: p.to_string(),
            })?,
            None => 8006,
        };

        Ok(PveCredentials {
            host: self.get("PVE_HOST").unwrap_or("127.0.0.1").to_string(),
            port,
            api_user: self.get("PVE_API_USER").unwrap_or("sync-daemon@pve").to_string(),
            token_name: self.get("PVE_TOKEN_NAME").unwrap_or("daemon-token").to_string(),
            secret: secret.to_string(),
            verify_ssl: self.get("PVE_VERIFY_SSL").is_some_and(|v| v != "0"),
        })
    }
}

/// Where secrets are looked up.
#[derive(Debug, Clone)]
pub struct SecretStore {
    env_file: PathBuf,
}

impl SecretStore {
    pub fn new(env_file: impl Into<PathBuf>) -> Self {
        Self {
            env_file: env_file.into(),
        }
    }

    /// The `.env` file in the same directory as the orchestrators file.
    pub fn beside(config_path: &Path) -> Self {
        let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        Self::new(dir.join(".env"))
    }

    pub fn env_file(&self) -> &Path {
        &self.env_file
    }

    /// Read the `.env` file (if any) and apply process environment overrides.
    pub fn load(&self) -> Secrets {
        let base = match std::fs::read_to_string(&self.env_file) {
            Ok(text) => {
                debug!(path = %self.env_file.display(), "Loaded secrets file");
                Secrets::parse_env_file(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Secrets::default(),
            Err(e) => {
                warn!(path = %self.env_file.display(), error = %e, "Could not read secrets file");
                Secrets::default()
            }
        };
        base.with_overrides(
            OVERRIDABLE_KEYS
                .iter()
                .filter_map(|k| std::env::var(k).ok().map(|v| (*k, v))),
        )
    }
}

/// Proxmox API token and endpoint.
#[derive(Clone)]
pub struct PveCredentials {
    pub host: String,
    pub port: u16,
    pub api_user: String,
    pub token_name: String,
    pub secret: String,
    pub verify_ssl: bool,
}

impl PveCredentials {
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}/api2/json", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("https://{}:{}/api2/json", self.host, self.port)
        }
    }

    pub fn authorization(&self) -> String {
        format!(
            "PVEAPIToken={}!{}={}",
            self.api_user, self.token_name, self.secret
        )
    }
}

impl std::fmt::Debug for PveCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PveCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_user", &self.api_user)
            .field("token_name", &self.token_name)
            .field("secret", &"<redacted>")
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}
