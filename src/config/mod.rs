mod defaults;
mod validation;

pub use defaults::*;
pub use validation::*;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::provider::mask_value;

// ============================================================================
// Options
// ============================================================================

/// Connection parameters for the Infisical service.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InfisicalOptions {
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Folder path to list.
    #[serde(default = "default_secret_path")]
    pub path: String,
    /// Load all keys and folders under `path`.
    #[serde(default)]
    pub recursive: bool,
}

impl InfisicalOptions {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        project_id: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            project_id: project_id.into(),
            environment: environment.into(),
            ..Self::default()
        }
    }

    pub fn with_site_url(mut self, site_url: impl Into<String>) -> Self {
        self.site_url = site_url.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>, recursive: bool) -> Self {
        self.path = path.into();
        self.recursive = recursive;
        self
    }
}

impl Default for InfisicalOptions {
    fn default() -> Self {
        Self {
            site_url: default_site_url(),
            client_id: String::new(),
            client_secret: String::new(),
            project_id: String::new(),
            environment: default_environment(),
            path: default_secret_path(),
            recursive: false,
        }
    }
}

impl std::fmt::Debug for InfisicalOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfisicalOptions")
            .field("site_url", &self.site_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &mask_value(&self.client_secret))
            .field("project_id", &self.project_id)
            .field("environment", &self.environment)
            .field("path", &self.path)
            .field("recursive", &self.recursive)
            .finish()
    }
}

/// Everything a provider needs: connection parameters plus load policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceOptions {
    /// Swallow load failures instead of failing the configuration build.
    #[serde(default)]
    pub optional: bool,
    /// Background refresh period. `None` disables the timer.
    #[serde(default)]
    pub reload_after_ms: Option<u64>,
    /// Maximum wait for one fetch attempt.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub infisical: InfisicalOptions,
}

impl SourceOptions {
    pub fn new(infisical: InfisicalOptions) -> Self {
        Self {
            infisical,
            ..Self::default()
        }
    }

    pub fn reload_after(&self) -> Option<Duration> {
        self.reload_after_ms.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load options from file, environment, and defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            std::env::current_dir()
                .ok()
                .and_then(|cwd| find_options_file(&cwd))
        });

        let mut options = match config_path {
            Some(p) if p.exists() => {
                info!("Loading Infisical options from {}", p.display());
                load_options_file(&p)?
            }
            Some(p) => anyhow::bail!("Options file '{}' does not exist", p.display()),
            None => {
                info!("No options file found, using defaults and environment");
                SourceOptions::default()
            }
        };

        options.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(options)
    }

    /// Apply `INFISICAL_*` overrides, reading variables through `lookup`.
    ///
    /// Unparseable numeric or boolean values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(url) = var("SITE_URL") {
            self.infisical.site_url = url;
        }
        if let Some(id) = var("CLIENT_ID") {
            self.infisical.client_id = id;
        }
        if let Some(secret) = var("CLIENT_SECRET") {
            self.infisical.client_secret = secret;
        }
        if let Some(project) = var("PROJECT_ID") {
            self.infisical.project_id = project;
        }
        if let Some(env) = var("ENVIRONMENT") {
            self.infisical.environment = env;
        }
        if let Some(path) = var("PATH") {
            self.infisical.path = path;
        }
        if let Some(recursive) = var("RECURSIVE").and_then(|v| parse_bool(&v)) {
            self.infisical.recursive = recursive;
        }
        if let Some(optional) = var("OPTIONAL").and_then(|v| parse_bool(&v)) {
            self.optional = optional;
        }
        if let Some(ms) = var("RELOAD_AFTER_MS").and_then(|v| v.trim().parse().ok()) {
            self.reload_after_ms = Some(ms);
        }
        if let Some(ms) = var("TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.timeout_ms = ms;
        }
    }
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            optional: false,
            reload_after_ms: None,
            timeout_ms: DEFAULT_LOAD_TIMEOUT_MS,
            infisical: InfisicalOptions::default(),
        }
    }
}

fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENVIRONMENT.to_string()
}

fn default_secret_path() -> String {
    DEFAULT_SECRET_PATH.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_LOAD_TIMEOUT_MS
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Find the options file in standard locations.
/// Options file names, in order of preference within one directory.
const OPTIONS_FILE_NAMES: [&str; 4] = [
    "infisical.json",
    "infisical.yaml",
    "infisical.yml",
    "infisical.toml",
];

/// Find the nearest options file in `start` or one of its ancestors, falling
/// back to `~/.infisical/config.json`.
fn find_options_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find_map(|dir| {
            OPTIONS_FILE_NAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file())
        })
        .or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(".infisical").join("config.json"))
                .filter(|candidate| candidate.is_file())
        })
}

/// Load options from a file path, choosing the format by extension.
pub fn load_options_file(path: &Path) -> Result<SourceOptions> {
    let content = std::fs::read_to_string(path)?;

    let options = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
        Some("toml") => toml::from_str(&content)?,
        _ => json5::from_str(&content).or_else(|_| {
            serde_json::from_str(&content).map_err(|e| json5::Error::Message {
                msg: e.to_string(),
                location: None,
            })
        })?,
    };

    Ok(options)
}
