use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::models::{Role, parse_roles};

/// Setting keys (e.g. `"api.base_url"`) whose value came from an `SCX_*`
/// variable instead of the config file, mapped to that variable.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides(BTreeMap<&'static str, &'static str>);

impl EnvOverrides {
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The variable that supplied `key`, if any.
    pub fn source_of(&self, key: &str) -> Option<&'static str> {
        self.0.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub gate: GateConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// Backend REST endpoints and HTTP timeouts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    #[serde(default = "default_me_path")]
    pub me_path: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            logout_path: default_logout_path(),
            me_path: default_me_path(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Token lifecycle timings, all in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Safety margin applied to every expiry check.
    #[serde(default = "default_skew")]
    pub expiry_skew_secs: i64,
    /// How long before expiry the proactive refresh fires.
    #[serde(default = "default_lead")]
    pub refresh_lead_secs: u64,
    /// Remaining lifetime under which a token "should refresh soon".
    #[serde(default = "default_window")]
    pub refresh_window_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_skew_secs: default_skew(),
            refresh_lead_secs: default_lead(),
            refresh_window_secs: default_window(),
        }
    }
}

/// Durable tier selection. The ephemeral tier is always in-memory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            dir: default_storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Keyring => write!(f, "keyring"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown storage backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Route protection rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    /// Landing page when no role matches.
    #[serde(default = "default_fallback_home")]
    pub fallback_home: String,
    /// Path prefixes and the roles allowed to enter them.
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteRule>,
    /// Landing page per role, first match wins.
    #[serde(default = "default_home")]
    pub home: Vec<HomeRoute>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            fallback_home: default_fallback_home(),
            routes: default_routes(),
            home: default_home(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteRule {
    pub prefix: String,
    /// Empty means any authenticated user.
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    /// Public routes need no session at all.
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HomeRoute {
    pub role: Role,
    pub path: String,
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}
fn default_login_path() -> String {
    "/auth/login".to_string()
}
fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}
fn default_logout_path() -> String {
    "/auth/logout".to_string()
}
fn default_me_path() -> String {
    "/auth/me".to_string()
}
const fn default_connect_timeout() -> u64 {
    10
}
const fn default_request_timeout() -> u64 {
    30
}
const fn default_skew() -> i64 {
    crate::token::DEFAULT_SKEW_SECS
}
const fn default_lead() -> u64 {
    120
}
const fn default_window() -> u64 {
    300
}
fn default_storage_backend() -> StorageBackend {
    StorageBackend::File
}
fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scx-session")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_routes() -> Vec<RouteRule> {
    let rule = |prefix: &str, roles: &[Role]| RouteRule {
        prefix: prefix.to_string(),
        roles: roles.iter().cloned().collect(),
        public: false,
    };
    let public = |prefix: &str| RouteRule {
        prefix: prefix.to_string(),
        roles: BTreeSet::new(),
        public: true,
    };
    vec![
        public("/login"),
        public("/unauthorized"),
        rule("/procurement", &[Role::ADMIN, Role::APPROVISIONNEMENT]),
        rule("/production", &[Role::ADMIN, Role::PRODUCTION]),
        rule("/delivery", &[Role::ADMIN, Role::LIVRAISON]),
        rule("/admin", &[Role::ADMIN]),
    ]
}
fn default_home() -> Vec<HomeRoute> {
    let home = |role: Role, path: &str| HomeRoute {
        role,
        path: path.to_string(),
    };
    vec![
        home(Role::ADMIN, "/admin/dashboard"),
        home(Role::APPROVISIONNEMENT, "/procurement/dashboard"),
        home(Role::PRODUCTION, "/production/dashboard"),
        home(Role::LIVRAISON, "/delivery/dashboard"),
    ]
}
fn default_fallback_home() -> String {
    "/".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `SCX_` takes precedence over the
    /// file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Default config file location: `$XDG_CONFIG_HOME/scx-session/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scx-session")
            .join("config.toml")
    }

    /// Save the current (file-level) configuration to a TOML file.
    /// This serializes the config without env overrides applied.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay `SCX_*` variables. Values that fail to parse are ignored and
    /// the file value stays in effect.
    fn apply_env_overrides(&mut self) {
        let mut applied = BTreeMap::new();

        let api = &mut self.api;
        for (key, var, field) in [
            ("api.base_url", "SCX_API_BASE_URL", &mut api.base_url),
            ("api.login_path", "SCX_API_LOGIN_PATH", &mut api.login_path),
            ("api.refresh_path", "SCX_API_REFRESH_PATH", &mut api.refresh_path),
            ("api.logout_path", "SCX_API_LOGOUT_PATH", &mut api.logout_path),
            ("api.me_path", "SCX_API_ME_PATH", &mut api.me_path),
            ("logging.level", "SCX_LOG_LEVEL", &mut self.logging.level),
        ] {
            if let Ok(value) = std::env::var(var) {
                *field = value;
                applied.insert(key, var);
            }
        }

        for (key, var, field) in [
            ("api.connect_timeout_secs", "SCX_API_CONNECT_TIMEOUT", &mut api.connect_timeout_secs),
            ("api.request_timeout_secs", "SCX_API_REQUEST_TIMEOUT", &mut api.request_timeout_secs),
            ("session.refresh_lead_secs", "SCX_SESSION_LEAD_SECS", &mut self.session.refresh_lead_secs),
            ("session.refresh_window_secs", "SCX_SESSION_WINDOW_SECS", &mut self.session.refresh_window_secs),
        ] {
            if parse_env(var, field) {
                applied.insert(key, var);
            }
        }
        if parse_env("SCX_SESSION_SKEW_SECS", &mut self.session.expiry_skew_secs) {
            applied.insert("session.expiry_skew_secs", "SCX_SESSION_SKEW_SECS");
        }
        if parse_env("SCX_STORAGE_BACKEND", &mut self.storage.backend) {
            applied.insert("storage.backend", "SCX_STORAGE_BACKEND");
        }

        if let Some(dir) = std::env::var_os("SCX_STORAGE_DIR") {
            self.storage.dir = PathBuf::from(dir);
            applied.insert("storage.dir", "SCX_STORAGE_DIR");
        }
        if let Ok(flag) = std::env::var("SCX_LOG_JSON") {
            self.logging.json = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
            applied.insert("logging.json", "SCX_LOG_JSON");
        }
        // SCX_GATE_ADMIN_ROLES="ADMIN,SUPERVISOR" replaces the roles of /admin.
        if let Ok(list) = std::env::var("SCX_GATE_ADMIN_ROLES") {
            if let Some(rule) = self.gate.routes.iter_mut().find(|r| r.prefix == "/admin") {
                rule.roles = parse_roles(&list);
                applied.insert("gate.routes./admin", "SCX_GATE_ADMIN_ROLES");
            }
        }

        self.env_overrides = EnvOverrides(applied);
    }
}

/// Parse `var` into `field`; false when unset or malformed.
fn parse_env<T: FromStr>(var: &str, field: &mut T) -> bool {
    match std::env::var(var).ok().and_then(|v| v.trim().parse().ok()) {
        Some(parsed) => {
            *field = parsed;
            true
        }
        None => false,
    }
}

// Helpers for default storage and config directories
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })
    }

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
