//! Application settings
//!
//! Layered as built-in defaults, then `academia.toml` (from the platform
//! config directory or an explicit path), then `ACADEMIA_*` environment
//! variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use url::Url;

use academia_core::directory::Directory;

use crate::auth::guard::DEFAULT_SIGN_IN_PATH;

pub const CONFIG_FILE_NAME: &str = "academia.toml";
pub const ENV_PREFIX: &str = "ACADEMIA";
pub const DEFAULT_PROFILE_TABLE: &str = "usuarios";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// Base URL of the hosted service, e.g. `https://<ref>.supabase.co`
    #[serde(default)]
    pub provider_url: Option<String>,
    /// Public (anon) API key of the hosted service
    #[serde(default)]
    pub anon_key: Option<String>,
    pub profile_table: String,
    pub sign_in_path: String,
    /// Credential cache key prefixes; empty means the built-in list
    #[serde(default)]
    pub storage_prefixes: Vec<String>,
    pub request_timeout_secs: u64,
}

/// Validated connection settings for the hosted service
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub url: Url,
    pub anon_key: String,
    pub request_timeout: Duration,
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default file is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self> {
        let (file, required) = match path {
            Some(path) => (Some(path.to_path_buf()), true),
            None => (Self::default_path(), false),
        };

        let mut builder = Config::builder()
            .set_default("profile_table", DEFAULT_PROFILE_TABLE)?
            .set_default("sign_in_path", DEFAULT_SIGN_IN_PATH)?
            .set_default("request_timeout_secs", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if let Some(file) = &file {
            tracing::debug!("Reading settings from {}", file.display());
            builder = builder.add_source(
                File::from(file.clone())
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }
        let env = env
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("storage_prefixes");

        builder
            .add_source(env)
            .build()
            .and_then(|config| config.try_deserialize())
            .context("Failed to load settings")
    }

    pub fn default_path() -> Option<PathBuf> {
        Directory::config_directory().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    /// Connection settings, failing when the service is not configured
    pub fn provider(&self) -> Result<ProviderSettings> {
        let url = self.provider_url.as_deref().map(str::trim).unwrap_or_default();
        let anon_key = self.anon_key.as_deref().map(str::trim).unwrap_or_default();
        if url.is_empty() || anon_key.is_empty() {
            return Err(anyhow!(
                "Identity service is not configured: set {ENV_PREFIX}_PROVIDER_URL and \
                 {ENV_PREFIX}_ANON_KEY, or provider_url and anon_key in {CONFIG_FILE_NAME}"
            ));
        }

        let url = Url::parse(url).with_context(|| format!("Invalid provider URL {url}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("Provider URL must be http(s), got {}", url));
        }
        Ok(ProviderSettings {
            url,
            anon_key: anon_key.to_string(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}
