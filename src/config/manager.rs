// Configuration Manager implementation for Flow Monitor
//
// Loads `config.toml` from the configuration directory, overlays environment
// variables, and persists user changes back to the file.

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;

use super::types::{
    tenant_error, validate_credentials, ConfigPaths, EnvVars, FlowMonitorConfig, LogLevel, ValidationResult,
};

/// Main configuration manager for Flow Monitor
#[derive(Debug, Clone)]
pub struct ConfigManager {
    /// Effective configuration (file overlaid with environment)
    config: FlowMonitorConfig,
    /// Configuration as stored on disk
    file_config: FlowMonitorConfig,
    /// Path to configuration directory
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a configuration manager from the process environment
    pub async fn new() -> Result<Self> {
        let config_dir = Self::determine_config_dir()?;
        let mut manager = Self::with_config_dir(config_dir).await?;
        manager.apply_environment(|key| env::var(key).ok());
        Ok(manager)
    }

    /// Create a configuration manager rooted at `config_dir`, ignoring the environment
    pub async fn with_config_dir(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();
        tracing::debug!("Using configuration directory: {:?}", config_dir);

        if !config_dir.exists() {
            async_fs::create_dir_all(&config_dir)
                .await
                .context("Failed to create configuration directory")?;
            tracing::info!("Created configuration directory: {:?}", config_dir);
        }

        let file_config = Self::load_file(&config_dir.join(ConfigPaths::CONFIG_FILE)).await?;
        Ok(Self {
            config: file_config.clone(),
            file_config,
            config_dir,
        })
    }

    /// Determine the configuration directory to use
    fn determine_config_dir() -> Result<PathBuf> {
        if let Ok(config_dir) = env::var(EnvVars::CONFIG_DIR) {
            return Ok(PathBuf::from(config_dir));
        }
        ConfigPaths::default_config_dir()
    }

    async fn load_file(path: &Path) -> Result<FlowMonitorConfig> {
        if !path.exists() {
            tracing::debug!("Configuration file not found, using defaults");
            return Ok(FlowMonitorConfig::default());
        }

        tracing::debug!("Loading configuration from: {:?}", path);
        let content = async_fs::read_to_string(path)
            .await
            .context("Failed to read configuration file")?;
        toml::from_str(&content).context("Failed to parse configuration file")
    }

    /// Overlay variables from `lookup`; environment values take precedence
    pub fn apply_environment<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(client_id) = get(EnvVars::CLIENT_ID) {
            self.config.client_id = Some(client_id);
            tracing::debug!("Loaded client ID from environment");
        }
        if let Some(tenant_id) = get(EnvVars::TENANT_ID) {
            self.config.tenant_id = tenant_id;
        }
        if let Some(environment_id) = get(EnvVars::ENVIRONMENT_ID) {
            self.config.environment_id = Some(environment_id);
        }
        if let Some(org_url) = get(EnvVars::ORG_URL) {
            self.config.org_url = Some(org_url);
        }
        if let Some(token) = get(EnvVars::ACCESS_TOKEN) {
            self.config.access_token = Some(token);
            tracing::debug!("Loaded access token from environment");
        }
        if let Some(token) = get(EnvVars::DATAVERSE_TOKEN) {
            self.config.dataverse_token = Some(token);
            tracing::debug!("Loaded Dataverse token from environment");
        }
        if let Some(log_level) = get(EnvVars::LOG_LEVEL) {
            match log_level.parse::<LogLevel>() {
                Ok(level) => self.config.log_level = level,
                Err(e) => tracing::warn!("Ignoring {}: {}", EnvVars::LOG_LEVEL, e),
            }
        }
    }

    /// Get the effective configuration
    pub fn config(&self) -> &FlowMonitorConfig {
        &self.config
    }

    /// Get the configuration directory
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Path of the configuration file
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(ConfigPaths::CONFIG_FILE)
    }

    /// Validate the effective configuration
    pub fn validate(&self) -> ValidationResult {
        self.config.validate()
    }

    /// Validate and persist new app registration credentials.
    ///
    /// A blank tenant is stored as "common". Nothing is written when
    /// validation fails.
    pub async fn save_credentials(&mut self, client_id: &str, tenant_id: Option<&str>) -> Result<()> {
        let validation = validate_credentials(Some(client_id), tenant_id);
        if !validation.is_valid {
            anyhow::bail!(validation.errors.join("; "));
        }

        let client_id = client_id.trim().to_string();
        let tenant_id = tenant_id
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(super::types::DEFAULT_TENANT)
            .to_string();

        for config in [&mut self.config, &mut self.file_config] {
            config.client_id = Some(client_id.clone());
            config.tenant_id = tenant_id.clone();
        }
        self.save().await
    }

    /// Set a single configuration key by name and persist it
    pub async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.file_config.clone();
        let optional = |v: &str| Some(v.trim().to_string()).filter(|v| !v.is_empty());

        match key {
            "client_id" => updated.client_id = optional(value),
            "tenant_id" => updated.tenant_id = value.trim().to_string(),
            "environment_id" => updated.environment_id = optional(value),
            "org_url" => updated.org_url = optional(value),
            "maker_base_url" => updated.maker_base_url = value.trim().to_string(),
            "flow_api_base" => updated.flow_api_base = value.trim().to_string(),
            "scope" => updated.scope = value.trim().to_string(),
            "redirect_uri" => updated.redirect_uri = value.trim().to_string(),
            "log_level" => {
                updated.log_level = value.parse::<LogLevel>().map_err(anyhow::Error::msg)?
            }
            "request_timeout_seconds" => {
                updated.request_timeout_seconds =
                    value.trim().parse().context("Expected a number of seconds")?
            }
            "bridge_timeout_millis" => {
                updated.bridge_timeout_millis =
                    value.trim().parse().context("Expected a number of milliseconds")?
            }
            "max_concurrent_probes" => {
                updated.max_concurrent_probes =
                    value.trim().parse().context("Expected a positive number")?
            }
            other => anyhow::bail!("Unknown configuration key: {}", other),
        }

        let validation = match key {
            "client_id" => {
                validate_credentials(updated.client_id.as_deref(), Some(&updated.tenant_id))
            }
            "tenant_id" => {
                let mut result = ValidationResult::new();
                if let Some(error) = tenant_error(&updated.tenant_id) {
                    result.add_error(error);
                }
                result
            }
            _ => updated.validate_settings(),
        };
        if !validation.is_valid {
            anyhow::bail!(validation.errors.join("; "));
        }

        self.file_config = updated;
        self.reapply_file_values(key);
        self.save().await
    }

    fn reapply_file_values(&mut self, key: &str) {
        let file = &self.file_config;
        let effective = &mut self.config;
        match key {
            "client_id" => effective.client_id = file.client_id.clone(),
            "tenant_id" => effective.tenant_id = file.tenant_id.clone(),
            "environment_id" => effective.environment_id = file.environment_id.clone(),
            "org_url" => effective.org_url = file.org_url.clone(),
            "maker_base_url" => effective.maker_base_url = file.maker_base_url.clone(),
            "flow_api_base" => effective.flow_api_base = file.flow_api_base.clone(),
            "scope" => effective.scope = file.scope.clone(),
            "redirect_uri" => effective.redirect_uri = file.redirect_uri.clone(),
            "log_level" => effective.log_level = file.log_level,
            "request_timeout_seconds" => {
                effective.request_timeout_seconds = file.request_timeout_seconds
            }
            "bridge_timeout_millis" => effective.bridge_timeout_millis = file.bridge_timeout_millis,
            "max_concurrent_probes" => effective.max_concurrent_probes = file.max_concurrent_probes,
            _ => {}
        }
    }

    /// Save the stored configuration to disk
    pub async fn save(&self) -> Result<()> {
        let content = toml::to_string_pretty(&self.file_config)
            .context("Failed to serialize configuration")?;
        async_fs::write(self.config_file(), content)
            .await
            .context("Failed to write configuration file")?;

        tracing::info!("Configuration saved to {:?}", self.config_file());
        Ok(())
    }
}
