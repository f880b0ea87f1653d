// Azure AD implicit-grant helpers and setup guidance for Flow Monitor
//
// Builds the authorize URL for an app registration, parses the redirect the
// identity provider sends back, and tells the user what to configure when
// credentials are missing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use super::types::{AccessToken, EnvVars, FlowMonitorConfig};
use crate::error::{FlowMonitorError, Result};

/// Token lifetime assumed when the redirect carries no `expires_in`
pub const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;

/// Authority host for Azure AD sign-in
pub const AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Build the implicit-grant authorize URL for the configured app registration
pub fn authorize_url(config: &FlowMonitorConfig) -> Result<Url> {
    let client_id = config
        .client_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            FlowMonitorError::Config(
                "Azure AD Client ID not configured. Run 'flow-monitor config set client_id <id>'."
                    .to_string(),
            )
        })?;

    let base = format!("{}/{}/oauth2/v2.0/authorize", AUTHORITY_HOST, config.tenant());
    let mut url = Url::parse(&base)
        .map_err(|e| FlowMonitorError::Config(format!("Invalid tenant '{}': {}", config.tenant(), e)))?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("response_type", "token")
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("scope", &config.scope)
        .append_pair("prompt", "select_account");
    Ok(url)
}

/// Extract the access token (or the provider's error) from a redirect URL.
///
/// Parameters are read from the fragment first, then the query.
pub fn parse_redirect(redirect: &str) -> Result<AccessToken> {
    let url = Url::parse(redirect.trim())
        .map_err(|e| FlowMonitorError::Auth(format!("Invalid redirect URL: {}", e)))?;

    let fragment: HashMap<String, String> = url
        .fragment()
        .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let param = |key: &str| fragment.get(key).or_else(|| query.get(key)).cloned();

    if let Some(error) = param("error") {
        let description = param("error_description").unwrap_or_default();
        return Err(FlowMonitorError::Auth(format!(
            "Azure AD Error: {} - {}",
            error, description
        )));
    }

    let token = fragment
        .get("access_token")
        .cloned()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| FlowMonitorError::Auth("No access token in response".to_string()))?;
    let expires_in = fragment
        .get("expires_in")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(DEFAULT_EXPIRES_IN_SECONDS);

    Ok(AccessToken::new(token, expires_in))
}

/// Authentication setup guide
pub struct AuthSetupGuide;

impl AuthSetupGuide {
    /// Generate setup instructions for missing credentials
    pub fn generate_setup_instructions(config: &FlowMonitorConfig) -> SetupInstructions {
        let mut instructions = SetupInstructions::new();

        if !config.has_client_id() {
            instructions.add_step(SetupStep {
                title: "Register an Azure AD application".to_string(),
                description: "Create a public client app with the Power Automate 'Flows.Read.All' permission and implicit grant enabled".to_string(),
                action: SetupAction::VisitUrl {
                    url: "https://portal.azure.com/#view/Microsoft_AAD_RegisteredApps/ApplicationsListBlade".to_string(),
                    description: "Open App registrations in the Azure portal".to_string(),
                },
                required: true,
            });
            instructions.add_step(SetupStep {
                title: "Save the client ID".to_string(),
                description: "Store the application (client) ID; add the tenant ID for single-tenant apps".to_string(),
                action: SetupAction::RunCommand {
                    command: "flow-monitor config set client_id <application-id>".to_string(),
                    description: "Writes the client ID to the configuration file".to_string(),
                },
                required: true,
            });
        }

        if config.environment_id.as_deref().map_or(true, str::is_empty) {
            instructions.add_step(SetupStep {
                title: "Set the environment".to_string(),
                description: "Run history is looked up per Power Platform environment".to_string(),
                action: SetupAction::RunCommand {
                    command: "flow-monitor config set environment_id <environment-id>".to_string(),
                    description: "The id appears in maker portal URLs after /environments/".to_string(),
                },
                required: true,
            });
        }

        if config.org_url.as_deref().map_or(true, str::is_empty) {
            instructions.add_step(SetupStep {
                title: "Set the organization URL".to_string(),
                description: "Flows are read from the environment's Dataverse organization".to_string(),
                action: SetupAction::RunCommand {
                    command: "flow-monitor config set org_url https://<org>.crm.dynamics.com".to_string(),
                    description: "Use the URL of your model-driven app without a path".to_string(),
                },
                required: true,
            });
        }

        instructions.add_step(SetupStep {
            title: "Set Environment Variables (Optional)".to_string(),
            description: "You can set environment variables instead of using the config file".to_string(),
            action: SetupAction::SetEnvironmentVariables {
                variables: vec![
                    (EnvVars::CLIENT_ID.to_string(), "your_client_id".to_string()),
                    (EnvVars::TENANT_ID.to_string(), "common".to_string()),
                    (EnvVars::ACCESS_TOKEN.to_string(), "pre_acquired_token".to_string()),
                ],
            },
            required: false,
        });

        instructions
    }
}

/// Setup instructions for authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupInstructions {
    pub steps: Vec<SetupStep>,
}

impl SetupInstructions {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn add_step(&mut self, step: SetupStep) {
        self.steps.push(step);
    }

    pub fn required_steps(&self) -> Vec<&SetupStep> {
        self.steps.iter().filter(|step| step.required).collect()
    }

    pub fn optional_steps(&self) -> Vec<&SetupStep> {
        self.steps.iter().filter(|step| !step.required).collect()
    }
}

impl Default for SetupInstructions {
    fn default() -> Self {
        Self::new()
    }
}

/// Individual setup step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupStep {
    pub title: String,
    pub description: String,
    pub action: SetupAction,
    pub required: bool,
}

/// Action to take for a setup step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SetupAction {
    VisitUrl { url: String, description: String },
    RunCommand { command: String, description: String },
    SetEnvironmentVariables { variables: Vec<(String, String)> },
}
