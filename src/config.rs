//! Configuration management for oaichat
//!
//! This module handles loading, validating, and saving the YAML config file
//! that holds provider profiles and chat defaults, and resolves the active
//! profile with environment overrides applied.

use crate::error::{OaichatError, Result};
use directories::ProjectDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable pointing at the config file
pub const CONFIG_ENV: &str = "OAICHAT_CONFIG";
/// Overrides the resolved profile's API key
pub const API_KEY_ENV: &str = "OAICHAT_API_KEY";
/// Overrides the resolved profile's base URL
pub const BASE_URL_ENV: &str = "OAICHAT_BASE_URL";
/// Overrides the resolved profile's default model
pub const MODEL_ENV: &str = "OAICHAT_MODEL";

/// Name used for the transient profile built purely from environment variables
pub const ENV_PROFILE_NAME: &str = "env";

const PROFILE_NAME_PATTERN: &str = r"^[a-zA-Z0-9_-]+$";

/// Main configuration structure
///
/// # Examples
///
/// ```
/// use oaichat::config::Config;
///
/// let yaml = r#"
/// default_profile: local
/// profiles:
///   local:
///     base_url: http://localhost:11434/v1
///     api_key: ollama
///     default_model: llama3
/// "#;
/// let config: Config = serde_yaml::from_str(yaml).unwrap();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.get_profile("local").unwrap().default_model.as_deref(), Some("llama3"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the profile used when none is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,

    /// Profiles keyed by name
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileSettings>,

    /// Chat behaviour defaults
    #[serde(default)]
    pub chat: ChatConfig,
}

/// A profile as stored in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSettings {
    /// API base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Bearer token sent with each request
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProfileSettings {
    /// Settings with only the required fields
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            default_model: None,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A named, resolved profile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Whether this is the configured default profile
    pub is_default: bool,
}

impl Profile {
    /// Minimal profile, mostly useful in tests and examples
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            default_model: None,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            is_default: false,
        }
    }

    fn from_settings(name: &str, settings: &ProfileSettings, is_default: bool) -> Self {
        Self {
            name: name.to_string(),
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
            default_model: settings.default_model.clone(),
            system_prompt: settings.system_prompt.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            is_default,
        }
    }

    /// API key with everything but the last four characters hidden
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len().min(12) - 4), tail)
    }
}

/// Field changes for [`Config::update_profile`]
///
/// `None` leaves a field untouched. For the optional text fields an empty
/// string clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Chat behaviour configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Stream responses token by token
    #[serde(default = "default_stream")]
    pub stream: bool,

    /// Keep the partial reply when a streamed turn is cancelled
    #[serde(default)]
    pub save_partial: bool,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Default number of rows for `convo list`
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_stream() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    crate::providers::openai::DEFAULT_TIMEOUT_SECS
}

fn default_history_limit() -> usize {
    20
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            stream: default_stream(),
            save_partial: false,
            request_timeout_seconds: default_request_timeout(),
            history_limit: default_history_limit(),
        }
    }
}

/// Check a profile name against `[a-zA-Z0-9_-]+`
pub fn validate_profile_name(name: &str) -> Result<()> {
    let re = Regex::new(PROFILE_NAME_PATTERN)
        .map_err(|e| OaichatError::Config(format!("Invalid name pattern: {}", e)))?;
    if !re.is_match(name) {
        return Err(OaichatError::Config(format!(
            "Invalid profile name '{}': use letters, digits, '_' or '-'",
            name
        ))
        .into());
    }
    Ok(())
}

/// Check that a base URL is an absolute http(s) URL
pub fn validate_base_url(base_url: &str) -> Result<()> {
    let parsed = url::Url::parse(base_url)
        .map_err(|e| OaichatError::Config(format!("Invalid base URL '{}': {}", base_url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(OaichatError::Config(format!(
            "Invalid base URL '{}': unsupported scheme '{}'",
            base_url, other
        ))
        .into()),
    }
}

/// Check that a sampling temperature is within `0.0..=2.0`
pub fn validate_temperature(temperature: f32) -> Result<()> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(OaichatError::Config(format!(
            "temperature must be between 0.0 and 2.0, got {}",
            temperature
        ))
        .into());
    }
    Ok(())
}

fn validate_settings(name: &str, settings: &ProfileSettings) -> Result<()> {
    validate_profile_name(name)?;
    validate_base_url(&settings.base_url)?;
    if let Some(t) = settings.temperature {
        validate_temperature(t)?;
    }
    if settings.max_tokens == Some(0) {
        return Err(OaichatError::Config(format!(
            "Profile '{}': max_tokens must be greater than 0",
            name
        ))
        .into());
    }
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(non_empty)
}

impl Config {
    /// Default config file location: `<config_dir>/oaichat/config.yaml`
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "oaichat").ok_or_else(|| {
            OaichatError::Config("Could not determine configuration directory".into())
        })?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    /// Load configuration from a file
    ///
    /// A missing file yields an empty configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read, parsed, or
    /// fails validation
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| OaichatError::Config(format!("Failed to read config file: {}", e)))?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| OaichatError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;

        tracing::debug!(
            "Loaded config from {} ({} profiles)",
            path.display(),
            config.profiles.len()
        );
        Ok(config)
    }

    /// Write the configuration to a file, creating parent directories
    ///
    /// On Unix the file is restricted to the owner (`0600`) because it
    /// contains API keys.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(OaichatError::from)?;
            }
        }

        let yaml = serde_yaml::to_string(self).map_err(OaichatError::from)?;
        std::fs::write(path, yaml).map_err(OaichatError::from)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(OaichatError::from)?;
        }

        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        for (name, settings) in &self.profiles {
            validate_settings(name, settings)?;
        }

        match &self.default_profile {
            Some(name) if !self.profiles.contains_key(name) => {
                return Err(OaichatError::Config(format!(
                    "default_profile '{}' does not name a configured profile",
                    name
                ))
                .into());
            }
            None if !self.profiles.is_empty() => {
                return Err(OaichatError::Config(
                    "default_profile must be set when profiles are configured".to_string(),
                )
                .into());
            }
            _ => {}
        }

        if self.chat.request_timeout_seconds == 0 {
            return Err(OaichatError::Config(
                "chat.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.chat.history_limit == 0 {
            return Err(OaichatError::Config(
                "chat.history_limit must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Look up a profile by name
    pub fn get_profile(&self, name: &str) -> Result<Profile> {
        let settings = self
            .profiles
            .get(name)
            .ok_or_else(|| OaichatError::profile_not_found(name))?;
        Ok(Profile::from_settings(
            name,
            settings,
            self.default_profile.as_deref() == Some(name),
        ))
    }

    /// All profiles, ordered by name
    pub fn list_profiles(&self) -> Vec<Profile> {
        self.profiles
            .iter()
            .map(|(name, settings)| {
                Profile::from_settings(
                    name,
                    settings,
                    self.default_profile.as_deref() == Some(name.as_str()),
                )
            })
            .collect()
    }

    /// Add a new profile
    ///
    /// The first profile added becomes the default regardless of
    /// `make_default`.
    ///
    /// # Errors
    ///
    /// Returns `OaichatError::Config` if the name is taken or a field is invalid
    pub fn add_profile(
        &mut self,
        name: &str,
        settings: ProfileSettings,
        make_default: bool,
    ) -> Result<()> {
        validate_settings(name, &settings)?;
        if self.profiles.contains_key(name) {
            return Err(
                OaichatError::Config(format!("Profile '{}' already exists", name)).into(),
            );
        }

        self.profiles.insert(name.to_string(), settings);
        if make_default || self.default_profile.is_none() {
            self.default_profile = Some(name.to_string());
        }

        tracing::info!("Added profile {}", name);
        Ok(())
    }

    /// Apply field changes to an existing profile
    pub fn update_profile(&mut self, name: &str, update: ProfileUpdate) -> Result<Profile> {
        let current = self
            .profiles
            .get(name)
            .ok_or_else(|| OaichatError::profile_not_found(name))?;

        let mut next = current.clone();
        if let Some(base_url) = update.base_url {
            next.base_url = base_url;
        }
        if let Some(api_key) = update.api_key {
            next.api_key = api_key;
        }
        if let Some(model) = update.default_model {
            next.default_model = non_empty(model);
        }
        if let Some(prompt) = update.system_prompt {
            next.system_prompt = non_empty(prompt);
        }
        if let Some(temperature) = update.temperature {
            next.temperature = Some(temperature);
        }
        if let Some(max_tokens) = update.max_tokens {
            next.max_tokens = Some(max_tokens);
        }

        validate_settings(name, &next)?;
        self.profiles.insert(name.to_string(), next);
        self.get_profile(name)
    }

    /// Remove a profile
    ///
    /// If it was the default, the first remaining profile (by name) is
    /// promoted. Returns the name of the new default, if it changed.
    pub fn remove_profile(&mut self, name: &str) -> Result<Option<String>> {
        if self.profiles.remove(name).is_none() {
            return Err(OaichatError::profile_not_found(name).into());
        }

        if self.default_profile.as_deref() != Some(name) {
            return Ok(None);
        }

        self.default_profile = self.profiles.keys().next().cloned();
        match &self.default_profile {
            Some(promoted) => {
                tracing::info!("Removed default profile {}; {} is now default", name, promoted);
            }
            None => tracing::info!("Removed last profile {}", name),
        }
        Ok(self.default_profile.clone())
    }

    /// Make a profile the default
    pub fn set_default_profile(&mut self, name: &str) -> Result<()> {
        if !self.profiles.contains_key(name) {
            return Err(OaichatError::profile_not_found(name).into());
        }
        self.default_profile = Some(name.to_string());
        Ok(())
    }

    /// Set a profile's default model
    pub fn update_profile_model(&mut self, name: &str, model: &str) -> Result<()> {
        let settings = self
            .profiles
            .get_mut(name)
            .ok_or_else(|| OaichatError::profile_not_found(name))?;
        settings.default_model = non_empty(model.to_string());
        Ok(())
    }

    /// Resolve the profile to use for a command
    ///
    /// Uses `name` or the default profile, then applies `OAICHAT_API_KEY`,
    /// `OAICHAT_BASE_URL` and `OAICHAT_MODEL`. Overrides are never written
    /// back to the file. With no profiles configured, a transient profile is
    /// built from the environment when `OAICHAT_BASE_URL` holds a valid URL.
    ///
    /// # Errors
    ///
    /// Returns `OaichatError::NotFound` for an unknown name, or
    /// `OaichatError::Config` when nothing is configured
    pub fn resolve_profile(&self, name: Option<&str>) -> Result<Profile> {
        let mut profile = match name.or(self.default_profile.as_deref()) {
            Some(name) => self.get_profile(name)?,
            None => match env_value(BASE_URL_ENV).filter(|url| match validate_base_url(url) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Ignoring {}: {}", BASE_URL_ENV, e);
                    false
                }
            }) {
                Some(base_url) => {
                    tracing::debug!("No profiles configured; using {}", BASE_URL_ENV);
                    let mut p = Profile::new(ENV_PROFILE_NAME, base_url, "");
                    p.is_default = true;
                    p
                }
                None => {
                    return Err(OaichatError::Config(
                        "No profile configured. Run `oaichat profile add <name> --base-url <url> --api-key <key>`"
                            .to_string(),
                    )
                    .into());
                }
            },
        };

        if let Some(key) = env_value(API_KEY_ENV) {
            tracing::debug!("Using API key from {}", API_KEY_ENV);
            profile.api_key = key;
        }
        if let Some(base_url) = env_value(BASE_URL_ENV) {
            match validate_base_url(&base_url) {
                Ok(()) => profile.base_url = base_url,
                Err(e) => tracing::warn!("Ignoring {}: {}", BASE_URL_ENV, e),
            }
        }
        if let Some(model) = env_value(MODEL_ENV) {
            profile.default_model = Some(model);
        }

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;
    use serial_test::serial;
    use std::env;
    use tempfile::tempdir;

    fn settings(url: &str) -> ProfileSettings {
        ProfileSettings::new(url, "sk-test")
    }

    fn clear_env() {
        env::remove_var(API_KEY_ENV);
        env::remove_var(BASE_URL_ENV);
        env::remove_var(MODEL_ENV);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.profiles.is_empty());
        assert!(config.default_profile.is_none());
        assert!(config.chat.stream);
        assert!(!config.chat.save_partial);
        assert_eq!(config.chat.request_timeout_seconds, 600);
        assert_eq!(config.chat.history_limit, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
default_profile: openai
profiles:
  openai:
    base_url: https://api.openai.com/v1
    api_key: sk-abc
    default_model: gpt-4o-mini
    system_prompt: You are terse.
    temperature: 0.7
    max_tokens: 1024
  local:
    base_url: http://localhost:11434/v1
    api_key: ollama
chat:
  stream: false
  save_partial: true
  request_timeout_seconds: 30
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert!(!config.chat.stream);
        assert!(config.chat.save_partial);
        assert_eq!(config.chat.request_timeout_seconds, 30);
        assert_eq!(config.chat.history_limit, 20);

        let openai = config.get_profile("openai").unwrap();
        assert!(openai.is_default);
        assert_eq!(openai.temperature, Some(0.7));
        assert_eq!(openai.max_tokens, Some(1024));
        assert!(!config.get_profile("local").unwrap().is_default);
    }

    #[test]
    fn test_validation_rejects_dangling_default() {
        let mut config = Config::default();
        config.default_profile = Some("ghost".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_requires_default_with_profiles() {
        let mut config = Config::default();
        config.profiles.insert("a".into(), settings("http://x"));
        assert!(config.validate().is_err());
        config.default_profile = Some("a".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let mut config = Config::default();
        config.chat.request_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_profile_name() {
        assert!(validate_profile_name("work_2-b").is_ok());
        assert!(validate_profile_name("").is_err());
        assert!(validate_profile_name("has space").is_err());
        assert!(validate_profile_name("dots.bad").is_err());
    }

    #[test]
    fn test_validate_base_url() {
        assert!(validate_base_url("https://api.openai.com/v1").is_ok());
        assert!(validate_base_url("http://localhost:1234").is_ok());
        assert!(validate_base_url("ftp://example.com").is_err());
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn test_validate_temperature() {
        assert!(validate_temperature(0.0).is_ok());
        assert!(validate_temperature(2.0).is_ok());
        assert!(validate_temperature(-0.1).is_err());
        assert!(validate_temperature(2.5).is_err());
    }

    #[test]
    fn test_first_profile_becomes_default() {
        let mut config = Config::default();
        config.add_profile("first", settings("http://a"), false).unwrap();
        config.add_profile("second", settings("http://b"), false).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("first"));

        config.add_profile("third", settings("http://c"), true).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("third"));

        let defaults = config.list_profiles().iter().filter(|p| p.is_default).count();
        assert_eq!(defaults, 1);
    }

    #[test]
    fn test_add_duplicate_profile_fails() {
        let mut config = Config::default();
        config.add_profile("dup", settings("http://a"), false).unwrap();
        assert!(config.add_profile("dup", settings("http://b"), false).is_err());
    }

    #[test]
    fn test_add_profile_rejects_invalid_fields() {
        let mut config = Config::default();
        let mut bad = settings("http://a");
        bad.temperature = Some(3.0);
        assert!(config.add_profile("t", bad, false).is_err());
        assert!(config.add_profile("bad name", settings("http://a"), false).is_err());
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_remove_default_promotes_another() {
        let mut config = Config::default();
        config.add_profile("b", settings("http://b"), false).unwrap();
        config.add_profile("a", settings("http://a"), false).unwrap();
        config.add_profile("c", settings("http://c"), false).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("b"));

        let promoted = config.remove_profile("b").unwrap();
        assert_eq!(promoted.as_deref(), Some("a"));
        assert!(config.validate().is_ok());

        assert_eq!(config.remove_profile("c").unwrap(), None);
        assert_eq!(config.remove_profile("a").unwrap(), None);
        assert!(config.default_profile.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_remove_unknown_profile_is_not_found() {
        let mut config = Config::default();
        let err = config.remove_profile("nope").unwrap_err();
        assert!(matches!(kind_of(&err), Some(OaichatError::NotFound { .. })));
    }

    #[test]
    fn test_set_default_profile() {
        let mut config = Config::default();
        config.add_profile("a", settings("http://a"), false).unwrap();
        config.add_profile("b", settings("http://b"), false).unwrap();

        config.set_default_profile("b").unwrap();
        assert!(config.get_profile("b").unwrap().is_default);
        assert!(!config.get_profile("a").unwrap().is_default);
        assert!(config.set_default_profile("zzz").is_err());
    }

    #[test]
    fn test_update_profile_fields() {
        let mut config = Config::default();
        let mut s = settings("http://a");
        s.system_prompt = Some("old".into());
        config.add_profile("a", s, false).unwrap();

        let updated = config
            .update_profile(
                "a",
                ProfileUpdate {
                    default_model: Some("gpt-4o".into()),
                    system_prompt: Some(String::new()),
                    temperature: Some(1.2),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.default_model.as_deref(), Some("gpt-4o"));
        assert!(updated.system_prompt.is_none());
        assert_eq!(updated.temperature, Some(1.2));
        assert_eq!(updated.base_url, "http://a");
    }

    #[test]
    fn test_update_profile_invalid_keeps_original() {
        let mut config = Config::default();
        config.add_profile("a", settings("http://a"), false).unwrap();
        let result = config.update_profile(
            "a",
            ProfileUpdate {
                base_url: Some("nope".into()),
                ..Default::default()
            },
        );
        assert!(result.is_err());
        assert_eq!(config.profiles["a"].base_url, "http://a");
    }

    #[test]
    fn test_update_profile_model() {
        let mut config = Config::default();
        config.add_profile("a", settings("http://a"), false).unwrap();
        config.update_profile_model("a", "llama3").unwrap();
        assert_eq!(config.profiles["a"].default_model.as_deref(), Some("llama3"));
        assert!(config.update_profile_model("missing", "x").is_err());
    }

    #[test]
    fn test_masked_api_key() {
        let p = Profile::new("p", "http://a", "sk-1234567890abcd");
        let masked = p.masked_api_key();
        assert!(masked.ends_with("abcd"));
        assert!(!masked.contains("123"));
        assert_eq!(Profile::new("p", "http://a", "abc").masked_api_key(), "***");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("config.yaml");

        let mut config = Config::default();
        config.add_profile("a", settings("http://a"), false).unwrap();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_save_io_failure_is_typed() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let err = Config::default()
            .save(&blocker.join("config.yaml"))
            .unwrap_err();
        assert!(matches!(kind_of(&err), Some(OaichatError::Io(_))));
    }

    #[test]
    fn test_load_nonexistent_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("missing.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_yaml_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "profiles: [unclosed").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(kind_of(&err), Some(OaichatError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_resolve_profile_applies_env_overrides() {
        clear_env();
        let mut config = Config::default();
        let mut s = settings("http://a");
        s.default_model = Some("file-model".into());
        config.add_profile("a", s, false).unwrap();

        env::set_var(API_KEY_ENV, "sk-from-env");
        env::set_var(MODEL_ENV, "env-model");
        let profile = config.resolve_profile(None).unwrap();
        clear_env();

        assert_eq!(profile.name, "a");
        assert_eq!(profile.api_key, "sk-from-env");
        assert_eq!(profile.default_model.as_deref(), Some("env-model"));
        assert_eq!(config.profiles["a"].api_key, "sk-test");
        assert_eq!(config.profiles["a"].default_model.as_deref(), Some("file-model"));
    }

    #[test]
    #[serial]
    fn test_resolve_profile_ignores_invalid_base_url_override() {
        clear_env();
        let mut config = Config::default();
        config.add_profile("a", settings("http://a"), false).unwrap();

        env::set_var(BASE_URL_ENV, "::not-a-url::");
        let profile = config.resolve_profile(Some("a")).unwrap();
        clear_env();

        assert_eq!(profile.base_url, "http://a");
    }

    #[test]
    #[serial]
    fn test_resolve_profile_without_config() {
        clear_env();
        let config = Config::default();
        let err = config.resolve_profile(None).unwrap_err();
        assert!(matches!(kind_of(&err), Some(OaichatError::Config(_))));

        env::set_var(BASE_URL_ENV, "http://localhost:8080/v1");
        env::set_var(API_KEY_ENV, "k");
        let profile = config.resolve_profile(None).unwrap();
        clear_env();

        assert_eq!(profile.name, ENV_PROFILE_NAME);
        assert_eq!(profile.base_url, "http://localhost:8080/v1");
        assert_eq!(profile.api_key, "k");
    }

    #[test]
    #[serial]
    fn test_resolve_profile_invalid_env_url_without_profiles() {
        clear_env();
        env::set_var(BASE_URL_ENV, "not a url");
        env::set_var(API_KEY_ENV, "k");
        let result = Config::default().resolve_profile(None);
        clear_env();

        let err = result.unwrap_err();
        assert!(matches!(kind_of(&err), Some(OaichatError::Config(_))));
        assert!(err.to_string().contains("No profile configured"));
    }

    #[test]
    #[serial]
    fn test_resolve_unknown_profile_is_not_found() {
        clear_env();
        let config = Config::default();
        let err = config.resolve_profile(Some("ghost")).unwrap_err();
        assert!(matches!(kind_of(&err), Some(OaichatError::NotFound { .. })));
    }
}
