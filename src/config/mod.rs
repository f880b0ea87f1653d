// Configuration module for Flow Monitor
//
// This module handles Azure AD app registration settings, environment
// endpoints, and sign-in helpers.

pub mod auth;
pub mod manager;
pub mod types;

// Re-export commonly used types
pub use manager::ConfigManager;
pub use types::{AccessToken, FlowMonitorConfig, LogLevel, ValidationResult};
