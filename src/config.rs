//! Site configuration loading and the effective config hash.
//!
//! Configuration comes from `bengal.toml` at the site root, overlaid with
//! `BENGAL_*` environment variables and an optional build profile. The
//! config hash covers the *effective* configuration (file + overlays +
//! profile), which catches changes a single file fingerprint would miss.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::core::hashing::{ContentHash, hash_json};

pub const CONFIG_FILE_NAME: &str = "bengal.toml";

/// Environment variable prefix recognized for overrides. Every variable with
/// this prefix participates in the config hash, even ones the core does not
/// interpret itself.
pub const ENV_PREFIX: &str = "BENGAL_";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SiteConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub baseurl: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Fail the build (exit 1) when pages were skipped due to errors.
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_incremental")]
    pub incremental: bool,
    /// Worker count for parallel rendering; 0 means auto.
    #[serde(default)]
    pub parallel_workers: usize,
    /// Glob patterns excluded from content/asset discovery.
    #[serde(default)]
    pub ignores: Vec<String>,
    #[serde(default)]
    pub versioning: VersioningConfig,
    /// Build profile name; part of the effective configuration.
    #[serde(default)]
    pub profile: Option<String>,
    /// Unrecognized tables and keys, preserved so they still contribute to
    /// the config hash and remain visible to templates.
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VersioningConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Sections under `content/` that are versioned, e.g. `["docs"]`.
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub latest: String,
}

fn default_title() -> String {
    "Bengal Site".to_string()
}

fn default_theme() -> String {
    "default".to_string()
}

fn default_output_dir() -> String {
    "public".to_string()
}

fn default_incremental() -> bool {
    true
}

impl Default for SiteConfig {
    fn default() -> Self {
        SiteConfig {
            title: default_title(),
            baseurl: String::new(),
            theme: default_theme(),
            output_dir: default_output_dir(),
            strict: false,
            incremental: default_incremental(),
            parallel_workers: 0,
            ignores: Vec::new(),
            versioning: VersioningConfig::default(),
            profile: None,
            extra: BTreeMap::new(),
        }
    }
}

impl SiteConfig {
    /// Validate configuration values.
    ///
    /// Returns an error if any glob patterns in `ignores` are invalid.
    pub fn validate(&self) -> Result<()> {
        for pattern in &self.ignores {
            Pattern::new(pattern)
                .with_context(|| format!("Invalid glob pattern in 'ignores': \"{}\"", pattern))?;
        }
        if self.versioning.enabled && self.versioning.versions.is_empty() {
            anyhow::bail!("versioning.enabled requires at least one entry in versioning.versions");
        }
        Ok(())
    }
}

/// Effective configuration: the parsed file plus environment overlays.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config: SiteConfig,
    /// All `BENGAL_*` variables present at load time, sorted by name.
    pub env_overrides: BTreeMap<String, String>,
    /// True if config was loaded from a file, false if using defaults.
    pub from_file: bool,
}

impl EffectiveConfig {
    /// Combine a parsed config with environment overrides.
    ///
    /// Recognized variables override their fields; every `BENGAL_*` variable
    /// contributes to the hash regardless.
    pub fn from_parts(
        mut config: SiteConfig,
        env_overrides: BTreeMap<String, String>,
        from_file: bool,
    ) -> Result<Self> {
        if let Some(title) = env_overrides.get("BENGAL_TITLE") {
            config.title = title.clone();
        }
        if let Some(theme) = env_overrides.get("BENGAL_THEME") {
            config.theme = theme.clone();
        }
        if let Some(output_dir) = env_overrides.get("BENGAL_OUTPUT_DIR") {
            config.output_dir = output_dir.clone();
        }
        if let Some(strict) = env_overrides.get("BENGAL_STRICT") {
            config.strict = matches!(strict.as_str(), "1" | "true" | "yes");
        }
        if let Some(profile) = env_overrides.get("BENGAL_PROFILE") {
            config.profile = Some(profile.clone());
        }
        config.validate()?;
        Ok(EffectiveConfig {
            config,
            env_overrides,
            from_file,
        })
    }

    /// SHA-256 over the canonically serialized effective configuration.
    pub fn config_hash(&self) -> ContentHash {
        let value = serde_json::json!({
            "config": config_to_json(&self.config),
            "env": self.env_overrides,
            "profile": self.config.profile,
        });
        hash_json(&value)
    }
}

fn config_to_json(config: &SiteConfig) -> serde_json::Value {
    serde_json::to_value(config).unwrap_or(serde_json::Value::Null)
}

/// Collect `BENGAL_*` variables from the process environment.
pub fn env_overrides_from_process() -> BTreeMap<String, String> {
    env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect()
}

pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Some(config_path);
        }
        if current.join(".git").exists() {
            return None;
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Load the effective configuration for a site root.
pub fn load_config(site_root: &Path) -> Result<EffectiveConfig> {
    let env_overrides = env_overrides_from_process();
    match find_config_file(site_root) {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            let config: SiteConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            EffectiveConfig::from_parts(config, env_overrides, true)
        }
        None => EffectiveConfig::from_parts(SiteConfig::default(), env_overrides, false),
    }
}
