use std::path::{Path, PathBuf};
use std::time::Duration;

use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::storage::{self, StorageManager};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
const DEFAULT_COMPLETION_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_MAX_RELATED_COUNT: usize = 5;
const DEFAULT_TAG_COUNT: usize = 5;
const DEFAULT_MAX_TAG_WORDS: usize = 2;
/// Prompt plus content is cut to this many characters before completion.
const DEFAULT_PROMPT_CHAR_LIMIT: usize = 10_000;
/// One call plus one retry.
const DEFAULT_PROVIDER_ATTEMPTS: usize = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not resolve base path: {0}")]
    BasePath(String),

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("missing {0}; set it in config.yaml or the environment")]
    MissingCredential(&'static str),
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

/// Sampling parameters for the completion provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_frequency_penalty")]
    pub frequency_penalty: f32,
    #[serde(default = "default_presence_penalty")]
    pub presence_penalty: f32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            frequency_penalty: default_frequency_penalty(),
            presence_penalty: default_presence_penalty(),
        }
    }
}

fn default_temperature() -> f32 {
    0.4
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_top_p() -> f32 {
    1.0
}

fn default_frequency_penalty() -> f32 {
    0.2
}

fn default_presence_penalty() -> f32 {
    1.6
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root URL of the content service, e.g. `https://blog.example.com/`
    #[serde(default)]
    pub site_url: String,

    /// Admin API key in `id:secret` form (secret is hex)
    #[serde(default)]
    pub admin_api_key: String,

    #[serde(default)]
    pub openai_api_key: String,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_completion_model")]
    pub completion_model: String,

    #[serde(default)]
    pub completion: CompletionParams,

    /// Neighbors kept per item (K)
    #[serde(default = "default_max_related_count")]
    pub max_related_count: usize,

    /// Tags asked from the completion provider per item
    #[serde(default = "default_tag_count")]
    pub tag_count: usize,

    /// Generated tags with more words than this are dropped
    #[serde(default = "default_max_tag_words")]
    pub max_tag_words: usize,

    #[serde(default = "default_prompt_char_limit")]
    pub prompt_char_limit: usize,

    /// Total attempts per provider call
    #[serde(default = "default_provider_attempts")]
    pub provider_attempts: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Defaults to `<base_path>/cache`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Log to this file instead of stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            admin_api_key: String::new(),
            openai_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            embedding_model: default_embedding_model(),
            completion_model: default_completion_model(),
            completion: CompletionParams::default(),
            max_related_count: default_max_related_count(),
            tag_count: default_tag_count(),
            max_tag_words: default_max_tag_words(),
            prompt_char_limit: default_prompt_char_limit(),
            provider_attempts: default_provider_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_dir: None,
            log_file: None,
            base_path: PathBuf::new(),
        }
    }
}

fn default_openai_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_completion_model() -> String {
    DEFAULT_COMPLETION_MODEL.to_string()
}

fn default_max_related_count() -> usize {
    DEFAULT_MAX_RELATED_COUNT
}

fn default_tag_count() -> usize {
    DEFAULT_TAG_COUNT
}

fn default_max_tag_words() -> usize {
    DEFAULT_MAX_TAG_WORDS
}

fn default_prompt_char_limit() -> usize {
    DEFAULT_PROMPT_CHAR_LIMIT
}

fn default_provider_attempts() -> usize {
    DEFAULT_PROVIDER_ATTEMPTS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// `GHOSTREL_BASE_PATH`, or `~/.local/share/ghostrel`.
pub fn default_base_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var("GHOSTREL_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .map_err(|err| ConfigError::BasePath(err.to_string()))?
        .ok_or_else(|| ConfigError::BasePath("home directory not found".to_string()))?;

    Ok(home.join(".local").join("share").join("ghostrel"))
}

/// Credentials needed to talk to the content service.
#[derive(Clone, Debug)]
pub struct SourceCredentials {
    pub site_url: url::Url,
    pub admin_api_key: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_related_count == 0 {
            return Err(invalid("max_related_count", "must be a positive integer"));
        }
        if self.tag_count == 0 {
            return Err(invalid("tag_count", "must be a positive integer"));
        }
        if self.max_tag_words == 0 {
            return Err(invalid("max_tag_words", "must be a positive integer"));
        }
        if self.prompt_char_limit == 0 {
            return Err(invalid("prompt_char_limit", "must be a positive integer"));
        }
        if self.provider_attempts == 0 {
            return Err(invalid("provider_attempts", "must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be greater than 0"));
        }

        if !self.site_url.is_empty() {
            parse_site_url(&self.site_url)?;
        }
        if !self.admin_api_key.is_empty() {
            check_admin_key(&self.admin_api_key)?;
        }

        Ok(())
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(default_base_path()?)
    }

    pub fn load_with(base_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base_path = base_path.as_ref();
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .map_err(|_| invalid("config.yaml", "file is not valid utf8"))?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        // resave in case new fields were added since the file was written
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let store = storage::BackendLocal::new(&self.base_path)?;
        store.write(CONFIG_FILE, serde_yml::to_string(&self)?.as_bytes())?;
        Ok(())
    }

    /// Secrets from the environment win over the file and are never saved.
    fn apply_env(&mut self) {
        let pick = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(key) = pick("GHOST_ADMIN_API_KEY") {
            self.admin_api_key = key;
        }
        if let Some(url) = pick("GHOST_SITE_URL") {
            self.site_url = url;
        }
        if let Some(key) = pick("OPENAI_API_KEY") {
            self.openai_api_key = key;
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.base_path.join("cache"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn require_source(&self) -> Result<SourceCredentials, ConfigError> {
        if self.site_url.trim().is_empty() {
            return Err(ConfigError::MissingCredential("site_url (GHOST_SITE_URL)"));
        }
        if self.admin_api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential(
                "admin_api_key (GHOST_ADMIN_API_KEY)",
            ));
        }
        check_admin_key(&self.admin_api_key)?;

        Ok(SourceCredentials {
            site_url: parse_site_url(&self.site_url)?,
            admin_api_key: self.admin_api_key.clone(),
        })
    }

    pub fn require_openai(&self) -> Result<&str, ConfigError> {
        if self.openai_api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential(
                "openai_api_key (OPENAI_API_KEY)",
            ));
        }
        Ok(&self.openai_api_key)
    }
}

fn parse_site_url(raw: &str) -> Result<url::Url, ConfigError> {
    // a trailing slash keeps Url::join from dropping the last path segment
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = url::Url::parse(&normalized).map_err(|err| invalid("site_url", err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("site_url", "must be an http(s) url"));
    }
    Ok(url)
}

fn check_admin_key(key: &str) -> Result<(), ConfigError> {
    let (id, secret) = key
        .split_once(':')
        .ok_or_else(|| invalid("admin_api_key", "expected `id:secret`"))?;
    if id.is_empty() || secret.is_empty() {
        return Err(invalid("admin_api_key", "expected `id:secret`"));
    }
    hex::decode(secret).map_err(|_| invalid("admin_api_key", "secret must be hex"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join("config.yaml").exists());
        assert_eq!(config.max_related_count, 5);
        assert_eq!(config.provider_attempts, 2);
        assert_eq!(config.prompt_char_limit, 10_000);
        assert_eq!(config.cache_dir(), tmp.path().join("cache"));
        assert_eq!(config.completion, CompletionParams::default());
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.yaml"),
            "max_related_count: 3\ncompletion:\n  temperature: 0.9\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.max_related_count, 3);
        assert_eq!(config.completion.temperature, 0.9);
        assert_eq!(config.completion.max_tokens, 1000);
        assert_eq!(config.tag_count, 5);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let mut config = Config::default();
        config.max_related_count = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "max_related_count",
                ..
            })
        ));

        let mut config = Config::default();
        config.admin_api_key = "no-colon".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.admin_api_key = "abc:not-hex".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.site_url = "ftp://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_source() {
        let mut config = Config::default();
        assert!(matches!(
            config.require_source(),
            Err(ConfigError::MissingCredential(_))
        ));

        config.site_url = "https://blog.example.com".into();
        config.admin_api_key = "6489:a1b2c3".into();
        let creds = config.require_source().unwrap();
        assert_eq!(creds.site_url.as_str(), "https://blog.example.com/");
        assert!(config.require_openai().is_err());
    }

    #[test]
    fn test_site_url_keeps_subpath() {
        let url = parse_site_url("https://example.com/blog").unwrap();
        assert_eq!(
            url.join("ghost/api/admin/posts/").unwrap().as_str(),
            "https://example.com/blog/ghost/api/admin/posts/"
        );
    }
}
