//! Target configuration: the section-based orchestrators file and the
//! per-target records derived from it.
//!
//! The file is line oriented. A non-indented `type: id` line opens a target
//! section, indented `key value` lines belong to the most recent section:
//!
//! ```text
//! afc: fabric-east
//!     host afc.example.net
//!     user admin
//!     password secret
//!     enabled 1
//!     fabric_names east-1, east-2
//!     reserved_vlans 1, 4094
//! ```
//!
//! Removing a section is how a target is hot-removed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ConfigError;

/// Default location of the orchestrators file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pve/sdn/orchestrators.cfg";

/// Poll interval used when a target does not set `poll_interval_seconds`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Per-request timeout used when a target does not set `request_timeout`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const INT_KEYS: &[&str] = &[
    "port",
    "poll_interval_seconds",
    "request_timeout",
];
const BOOL_KEYS: &[&str] = &["enabled", "verify_ssl"];

/// Fabric controller flavor, selected by the section type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKind {
    /// Fabric controller addressed by bearer token, resources by UUID.
    Afc,
    /// Policy manager addressed by session cookie, resources by name.
    Psm,
}

impl TargetKind {
    pub const ALL: [TargetKind; 2] = [TargetKind::Afc, TargetKind::Psm];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Afc => "afc",
            TargetKind::Psm => "psm",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "afc" => Ok(TargetKind::Afc),
            "psm" => Ok(TargetKind::Psm),
            _ => Err(()),
        }
    }
}

/// A typed value from a section body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl ConfigValue {
    fn as_text(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One `type: id` section with its raw key/value pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: TargetKind,
    pub id: String,
    pub values: BTreeMap<String, ConfigValue>,
}

impl Section {
    fn text(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(ConfigValue::as_text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(ConfigValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(ConfigValue::Bool(true)))
    }
}

/// One successful parse of the orchestrators file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    sections: BTreeMap<String, Section>,
}

impl ConfigSnapshot {
    /// Parse the file contents.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut sections: BTreeMap<String, Section> = BTreeMap::new();
        let mut current: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if !raw.starts_with([' ', '\t']) {
                let Some((kind, id)) = trimmed.split_once(':') else {
                    return Err(ConfigError::MalformedHeader {
                        line: line_no,
                        text: trimmed.to_string(),
                    });
                };
                let id = id.trim();
                if id.is_empty() {
                    return Err(ConfigError::MalformedHeader {
                        line: line_no,
                        text: trimmed.to_string(),
                    });
                }
                let kind: TargetKind =
                    kind.parse()
                        .map_err(|_| ConfigError::UnknownTargetType {
                            line: line_no,
                            kind: kind.trim().to_string(),
                        })?;
                // A repeated id reopens the existing section; the first type wins.
                sections.entry(id.to_string()).or_insert_with(|| Section {
                    kind,
                    id: id.to_string(),
                    values: BTreeMap::new(),
                });
                current = Some(id.to_string());
                continue;
            }

            let Some(section) = current.as_ref().and_then(|id| sections.get_mut(id)) else {
                debug!(line = line_no, "Ignoring indented line outside of a section");
                continue;
            };
            let Some((key, value)) = trimmed.split_once(char::is_whitespace) else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            let typed = if INT_KEYS.contains(&key) {
                match value.parse::<i64>() {
                    Ok(v) => ConfigValue::Int(v),
                    Err(_) => {
                        warn!(target_id = %section.id, key, value, "Ignoring non-integer value");
                        continue;
                    }
                }
            } else if BOOL_KEYS.contains(&key) {
                match value.parse::<i64>() {
                    Ok(v) => ConfigValue::Bool(v != 0),
                    Err(_) => {
                        warn!(target_id = %section.id, key, value, "Ignoring non-boolean value (expected 0/1)");
                        continue;
                    }
                }
            } else {
                ConfigValue::Text(value.to_string())
            };
            section.values.insert(key.to_string(), typed);
        }

        Ok(Self { sections })
    }

    /// Target ids with their flavor, in id order.
    pub fn targets(&self) -> impl Iterator<Item = (&str, TargetKind)> {
        self.sections.values().map(|s| (s.id.as_str(), s.kind))
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.get(id)
    }

    /// Resolve a target by id. `None` means the section is gone (hot-remove);
    /// `Some(Err(_))` means the section exists but is unusable.
    pub fn target(&self, id: &str) -> Option<Result<TargetConfig, ConfigError>> {
        self.sections.get(id).map(TargetConfig::from_section)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Everything a worker needs to reconcile one target for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub id: String,
    pub kind: TargetKind,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub tenant: String,
    /// Live mode when set; dry-run otherwise.
    pub enabled: bool,
    pub verify_ssl: bool,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub reserved_zone_names: BTreeSet<String>,
    pub reserved_vlan_ids: BTreeSet<u16>,
    /// Fabric scope names, in configured order.
    pub scopes: Vec<String>,
    /// Keys this engine does not interpret.
    pub extra: BTreeMap<String, String>,
}

impl TargetConfig {
    pub fn from_section(section: &Section) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            section
                .text(key)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::MissingKey {
                    target: section.id.clone(),
                    key,
                })
        };

        let host = required("host")?;
        let user = required("user")?;
        let password = required("password")?;
        let tenant = section.text("tenant").unwrap_or("default").to_string();

        let mut scopes = split_list(
            section
                .text("fabric_names")
                .or_else(|| section.text("fabric_name"))
                .unwrap_or(""),
        );
        if scopes.is_empty() && section.kind == TargetKind::Psm {
            scopes.push(tenant.clone());
        }
        if scopes.is_empty() {
            return Err(ConfigError::NoScopes {
                target: section.id.clone(),
            });
        }

        let reserved_zone_names = split_list(section.text("reserved_zone_names").unwrap_or(""))
            .into_iter()
            .collect();
        let reserved_vlan_ids = split_list(
            section
                .text("reserved_vlans")
                .or_else(|| section.text("reserved_vlan_ids"))
                .unwrap_or(""),
        )
        .into_iter()
        .filter_map(|tag| match tag.parse::<u16>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(target_id = %section.id, tag = %tag, "Ignoring invalid reserved VLAN id");
                None
            }
        })
        .collect();

        // Anything below one second falls back to the default.
        let seconds = |key: &str, default: Duration| match section.int(key) {
            Some(v) if v >= 1 => Duration::from_secs(v as u64),
            Some(v) => {
                warn!(
                    target_id = %section.id,
                    key,
                    value = v,
                    default_secs = default.as_secs(),
                    "Duration must be at least one second, using default"
                );
                default
            }
            None => default,
        };

        let known = [
            "host",
            "user",
            "password",
            "tenant",
            "fabric_names",
            "fabric_name",
            "reserved_zone_names",
            "reserved_vlans",
            "reserved_vlan_ids",
        ];
        let extra = section
            .values
            .iter()
            .filter(|(k, _)| !known.contains(&k.as_str()))
            .filter_map(|(k, v)| v.as_text().map(|v| (k.clone(), v.to_string())))
            .collect();

        Ok(Self {
            id: section.id.clone(),
            kind: section.kind,
            host,
            port: section.int("port").and_then(|p| u16::try_from(p).ok()),
            user,
            password,
            tenant,
            enabled: section.flag("enabled"),
            verify_ssl: section.flag("verify_ssl"),
            poll_interval: seconds("poll_interval_seconds", DEFAULT_POLL_INTERVAL),
            request_timeout: seconds("request_timeout", DEFAULT_REQUEST_TIMEOUT),
            reserved_zone_names,
            reserved_vlan_ids,
            scopes,
            extra,
        })
    }

    pub fn dry_run(&self) -> bool {
        !self.enabled
    }

    /// `https://host[:port]`, or the host verbatim when it already carries a scheme.
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        match self.port {
            Some(port) => format!("{}:{}", base, port),
            None => base,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Loads the orchestrators file and remembers the last good parse.
///
/// Each worker and the supervisor own their own store; nothing is shared.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    last: Option<Arc<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    /// Read and parse the file. On success the snapshot becomes the last good one.
    pub fn load(&mut self) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(self.path.clone())
            } else {
                ConfigError::Io {
                    path: self.path.clone(),
                    source: e,
                }
            }
        })?;
        let snapshot = Arc::new(ConfigSnapshot::parse(&text)?);
        self.last = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Like [`load`](Self::load), but falls back to the last good snapshot on error.
    pub fn reload(&mut self) -> Option<Arc<ConfigSnapshot>> {
        match self.load() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Config reload failed, keeping last good snapshot");
                self.last.clone()
            }
        }
    }

    pub fn last(&self) -> Option<Arc<ConfigSnapshot>> {
        self.last.clone()
    }
}
