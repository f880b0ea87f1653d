// Configuration types for Flow Monitor
//
// Azure AD app registration settings, environment endpoints and the
// validation rules applied before they are saved.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::flow::types::DEFAULT_MAKER_BASE_URL;

/// Tenant used when none is configured (multi-tenant app registrations)
pub const DEFAULT_TENANT: &str = "common";

/// Default orchestration API base URL
pub const DEFAULT_FLOW_API_BASE: &str = "https://api.flow.microsoft.com";

/// Default OAuth scope requested for the orchestration API
pub const DEFAULT_SCOPE: &str = "https://service.flow.microsoft.com/.default";

/// Log level for the library and CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

impl LogLevel {
    /// Default tracing filter for the crate; `verbose` raises it to at least debug
    pub fn filter_directive(&self, verbose: bool) -> String {
        let level = match self {
            LogLevel::Trace => LogLevel::Trace,
            _ if verbose => LogLevel::Debug,
            other => *other,
        };
        format!("flow_monitor={}", level)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("Unknown log level: {}", other)),
        }
    }
}

/// Bearer token with its expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Raw bearer token
    pub token: String,
    /// Token expiration time
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_in_seconds: i64) -> Self {
        Self {
            token: token.into(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_seconds),
        }
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check if the token expires within the given duration
    pub fn expires_within(&self, seconds: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(seconds) >= self.expires_at
    }
}

/// Full Flow Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowMonitorConfig {
    /// Azure AD application (client) id
    pub client_id: Option<String>,
    /// Azure AD tenant: "common" or a directory GUID
    pub tenant_id: String,
    /// Power Platform environment id
    pub environment_id: Option<String>,
    /// Dataverse organization URL, e.g. https://contoso.crm.dynamics.com
    pub org_url: Option<String>,
    /// Maker portal base URL used for deep links
    pub maker_base_url: String,
    /// Orchestration API base URL
    pub flow_api_base: String,
    /// OAuth scope for orchestration API tokens
    pub scope: String,
    /// Redirect URI registered for the app
    pub redirect_uri: String,
    /// Log level
    pub log_level: LogLevel,
    /// Per-request HTTP timeout in seconds
    pub request_timeout_seconds: u64,
    /// Budget for one bridge round trip in milliseconds
    pub bridge_timeout_millis: u64,
    /// Upper bound on concurrent relevance probes per page
    pub max_concurrent_probes: usize,
    /// Pre-acquired orchestration API token (environment only, never saved)
    #[serde(skip)]
    pub access_token: Option<String>,
    /// Pre-acquired Dataverse token (environment only, never saved)
    #[serde(skip)]
    pub dataverse_token: Option<String>,
}

impl Default for FlowMonitorConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            tenant_id: DEFAULT_TENANT.to_string(),
            environment_id: None,
            org_url: None,
            maker_base_url: DEFAULT_MAKER_BASE_URL.to_string(),
            flow_api_base: DEFAULT_FLOW_API_BASE.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            redirect_uri: "https://login.microsoftonline.com/common/oauth2/nativeclient"
                .to_string(),
            log_level: LogLevel::default(),
            request_timeout_seconds: 60,
            bridge_timeout_millis: 30_000,
            max_concurrent_probes: 250,
            access_token: None,
            dataverse_token: None,
        }
    }
}

impl FlowMonitorConfig {
    /// Check if an app registration is configured
    pub fn has_client_id(&self) -> bool {
        self.client_id
            .as_deref()
            .map_or(false, |id| !id.trim().is_empty())
    }

    /// Tenant, falling back to "common" when blank
    pub fn tenant(&self) -> &str {
        let tenant = self.tenant_id.trim();
        if tenant.is_empty() {
            DEFAULT_TENANT
        } else {
            tenant
        }
    }

    /// Validate everything that can be checked offline
    pub fn validate(&self) -> ValidationResult {
        let mut result = validate_credentials(self.client_id.as_deref(), Some(&self.tenant_id));
        let settings = self.validate_settings();
        result.is_valid &= settings.is_valid;
        result.errors.extend(settings.errors);
        result.warnings.extend(settings.warnings);
        result
    }

    /// Validate endpoints and limits, leaving credentials aside
    pub fn validate_settings(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.environment_id.as_deref().map_or(true, str::is_empty) {
            result.add_warning("No environment id configured; run history is unavailable".to_string());
        }
        match self.org_url.as_deref() {
            None | Some("") => {
                result.add_warning("No organization URL configured; flows cannot be scanned".to_string())
            }
            Some(url) if url::Url::parse(url).is_err() => {
                result.add_error(format!("Invalid organization URL: {}", url))
            }
            Some(_) => {}
        }
        for (label, url) in [
            ("maker portal", &self.maker_base_url),
            ("flow API", &self.flow_api_base),
        ] {
            if url::Url::parse(url).is_err() {
                result.add_error(format!("Invalid {} URL: {}", label, url));
            }
        }
        if self.request_timeout_seconds == 0 {
            result.add_error("Request timeout must be positive".to_string());
        }
        if self.max_concurrent_probes == 0 {
            result.add_error("Probe concurrency must be at least 1".to_string());
        }
        result
    }
}

fn guid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("valid GUID pattern")
    })
}

/// Whether `value` is a GUID in its canonical hyphenated form
pub fn is_guid(value: &str) -> bool {
    guid_pattern().is_match(value.trim())
}

/// Validate a client/tenant pair as entered by the user.
///
/// The client id is required and must be a GUID; the tenant may be blank,
/// "common", or a GUID.
pub fn validate_credentials(client_id: Option<&str>, tenant_id: Option<&str>) -> ValidationResult {
    let mut result = ValidationResult::new();
    if let Some(error) = client_id_error(client_id) {
        result.add_error(error);
    }
    if let Some(error) = tenant_error(tenant_id.unwrap_or("")) {
        result.add_error(error);
    }
    result
}

fn client_id_error(client_id: Option<&str>) -> Option<String> {
    match client_id.map(str::trim) {
        None | Some("") => Some("Client ID is required".to_string()),
        Some(id) if !is_guid(id) => Some(format!("Client ID must be a GUID, got '{}'", id)),
        Some(_) => None,
    }
}

/// Error for a tenant that is neither blank, "common", nor a GUID
pub fn tenant_error(tenant_id: &str) -> Option<String> {
    let tenant = tenant_id.trim();
    if tenant.is_empty() || tenant.eq_ignore_ascii_case(DEFAULT_TENANT) || is_guid(tenant) {
        None
    } else {
        Some(format!("Tenant ID must be 'common' or a GUID, got '{}'", tenant))
    }
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Whether the configuration is valid
    pub is_valid: bool,
    /// Validation errors
    pub errors: Vec<String>,
    /// Validation warnings
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Create a new validation result
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error to the validation result
    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    /// Add a warning to the validation result
    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Check if there are any issues
    pub fn has_issues(&self) -> bool {
        !self.errors.is_empty() || !self.warnings.is_empty()
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment variable names read by Flow Monitor
pub struct EnvVars;

impl EnvVars {
    pub const CLIENT_ID: &'static str = "FLOW_MONITOR_CLIENT_ID";
    pub const TENANT_ID: &'static str = "FLOW_MONITOR_TENANT_ID";
    pub const ENVIRONMENT_ID: &'static str = "FLOW_MONITOR_ENVIRONMENT_ID";
    pub const ORG_URL: &'static str = "FLOW_MONITOR_ORG_URL";
    pub const ACCESS_TOKEN: &'static str = "FLOW_MONITOR_ACCESS_TOKEN";
    pub const DATAVERSE_TOKEN: &'static str = "FLOW_MONITOR_DATAVERSE_TOKEN";
    pub const CONFIG_DIR: &'static str = "FLOW_MONITOR_CONFIG_DIR";
    pub const LOG_LEVEL: &'static str = "FLOW_MONITOR_LOG_LEVEL";
}

/// Configuration file paths and names
pub struct ConfigPaths;

impl ConfigPaths {
    /// Default configuration directory name
    pub const CONFIG_DIR_NAME: &'static str = ".flow-monitor";

    /// Configuration file name
    pub const CONFIG_FILE: &'static str = "config.toml";

    /// Get the default configuration directory
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(Self::CONFIG_DIR_NAME))
            .context("Failed to determine home directory")
    }

    /// Get the configuration file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join(Self::CONFIG_FILE))
    }
}
