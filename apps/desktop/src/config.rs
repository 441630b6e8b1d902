use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "lexdesk.toml";
const DATABASE_FILE: &str = "lexdesk.sqlite3";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub api_base_url: Option<String>,
    pub upload_tick_ms: u64,
    pub simulated_latency_ms: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lexdesk");
        Self {
            data_dir,
            database_url: None,
            api_base_url: None,
            upload_tick_ms: 200,
            simulated_latency_ms: 1500,
            log_filter: "info".into(),
        }
    }
}

/// Keys accepted in `lexdesk.toml`. Anything absent keeps its default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    data_dir: Option<PathBuf>,
    database_url: Option<String>,
    api_base_url: Option<String>,
    upload_tick_ms: Option<u64>,
    simulated_latency_ms: Option<u64>,
    log_filter: Option<String>,
}

impl Settings {
    /// SQLite URL for the persistence store: the explicit `database_url` when
    /// set, otherwise a file inside `data_dir`.
    pub fn resolved_database_url(&self) -> String {
        match self.database_url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => normalize_database_url(raw),
            _ => normalize_database_url(&self.data_dir.join(DATABASE_FILE).to_string_lossy()),
        }
    }

    fn apply_file(&mut self, file_cfg: FileSettings) {
        if let Some(v) = file_cfg.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file_cfg.database_url {
            self.database_url = Some(v);
        }
        if let Some(v) = file_cfg.api_base_url {
            self.api_base_url = non_empty(v);
        }
        if let Some(v) = file_cfg.upload_tick_ms {
            self.upload_tick_ms = v;
        }
        if let Some(v) = file_cfg.simulated_latency_ms {
            self.simulated_latency_ms = v;
        }
        if let Some(v) = file_cfg.log_filter {
            self.log_filter = v;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| {
            env(&format!("LEXDESK_{name}")).or_else(|| env(&format!("APP__{name}")))
        };

        if let Some(v) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = lookup("API_BASE_URL") {
            self.api_base_url = non_empty(v);
        }
        if let Some(v) = lookup("UPLOAD_TICK_MS") {
            match v.parse::<u64>() {
                Ok(parsed) => self.upload_tick_ms = parsed,
                Err(_) => warn!("config: ignoring non-numeric UPLOAD_TICK_MS '{v}'"),
            }
        }
        if let Some(v) = lookup("SIMULATED_LATENCY_MS") {
            match v.parse::<u64>() {
                Ok(parsed) => self.simulated_latency_ms = parsed,
                Err(_) => warn!("config: ignoring non-numeric SIMULATED_LATENCY_MS '{v}'"),
            }
        }
        if let Some(v) = lookup("LOG_FILTER") {
            self.log_filter = v;
        }
    }
}

pub fn load_settings(config_path: &Path) -> Settings {
    load_settings_with(config_path, |name| std::env::var(name).ok())
}

/// Defaults, then the config file if it exists and parses, then environment.
/// `LEXDESK_*` wins over its `APP__*` alias.
pub fn load_settings_with(config_path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => settings.apply_file(file_cfg),
            Err(err) => warn!(
                "config: ignoring unreadable {}: {err}",
                config_path.display()
            ),
        }
    }

    settings.apply_env(env);
    settings
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
