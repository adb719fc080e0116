//! CLS provisioning configuration
//!
//! The configuration is YAML. Unknown fields are rejected, sizing knobs fall
//! back to [`Defaults`], and `saml` plus at least one set of Service Manager
//! credentials are mandatory.

use crate::error::{ClsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Supported region: Europe
pub const REGION_EUROPE: &str = "eu";

/// Supported region: United States
pub const REGION_US: &str = "us";

/// Regions where a CLS instance can be provisioned
pub const SUPPORTED_REGIONS: &[&str] = &[REGION_EUROPE, REGION_US];

/// Sizing defaults applied when the file leaves a knob out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Defaults {
    pub retention_period: u32,
    pub max_data_instances: u32,
    pub max_ingest_instances: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            retention_period: 7,
            max_data_instances: 2,
            max_ingest_instances: 2,
        }
    }
}

/// Validated top-level CLS configuration
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Log retention period in days
    pub retention_period: u32,

    /// Number of Elasticsearch data nodes
    pub max_data_instances: u32,

    /// Number of Fluentd ingest nodes
    pub max_ingest_instances: u32,

    /// SAML settings passed to Kibana
    pub saml: SamlConfig,

    /// Service Manager credentials per region
    pub service_manager: ServiceManagerConfig,
}

/// Service Manager credentials per region
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ServiceManagerConfig {
    #[serde(default)]
    pub credentials: Vec<Credentials>,
}

/// Basic-auth credentials for a Service Manager tenant in one region
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("region", &self.region)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// SAML settings used by Kibana
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    /// Backend role mapped to a SAML group, allowed to modify the security module
    #[serde(default)]
    pub admin_group: String,

    /// Use IdP-initiated SSO
    #[serde(default)]
    pub initiated: bool,

    /// Key used to sign tokens
    #[serde(default)]
    pub exchange_key: String,

    /// Attribute the backend roles are read from
    #[serde(default)]
    pub roles_key: String,

    #[serde(default)]
    pub idp: SamlIdpConfig,

    #[serde(default)]
    pub sp: SamlSpConfig,
}

/// SAML identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SamlIdpConfig {
    #[serde(default)]
    pub metadata_url: String,
    #[serde(default)]
    pub entity_id: String,
}

/// SAML service provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SamlSpConfig {
    #[serde(default)]
    pub entity_id: String,

    /// Base64 encoded request signing key
    #[serde(default)]
    pub signature_private_key: String,
}

/// Shape of the YAML document before defaults and validation
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigFile {
    retention_period: Option<u32>,
    max_data_instances: Option<u32>,
    max_ingest_instances: Option<u32>,
    saml: Option<SamlConfig>,
    service_manager: Option<ServiceManagerConfig>,
}

/// Parse and validate YAML configuration
pub fn load(yaml: &str) -> Result<Config> {
    let file: ConfigFile = serde_yaml::from_str(yaml)?;
    let config = merge(&Defaults::default(), file)?;
    config.validate()?;
    debug!(
        regions = config.service_manager.credentials.len(),
        retention_period = config.retention_period,
        "Loaded CLS config"
    );
    Ok(config)
}

fn merge(defaults: &Defaults, file: ConfigFile) -> Result<Config> {
    let saml = file
        .saml
        .ok_or_else(|| ClsError::InvalidConfig("no SAML".to_string()))?;
    let service_manager = file
        .service_manager
        .ok_or_else(|| ClsError::InvalidConfig("no Service Manager credentials".to_string()))?;

    Ok(Config {
        retention_period: file.retention_period.unwrap_or(defaults.retention_period),
        max_data_instances: file.max_data_instances.unwrap_or(defaults.max_data_instances),
        max_ingest_instances: file
            .max_ingest_instances
            .unwrap_or(defaults.max_ingest_instances),
        saml,
        service_manager,
    })
}

impl Config {
    /// Check credential invariants
    pub fn validate(&self) -> Result<()> {
        if self.service_manager.credentials.is_empty() {
            return Err(ClsError::InvalidConfig(
                "no Service Manager credentials".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for creds in &self.service_manager.credentials {
            creds.validate().map_err(|e| {
                ClsError::InvalidConfig(format!(
                    "while validating Service Manager credentials: {}",
                    e
                ))
            })?;
            if !seen.insert(creds.region.as_str()) {
                return Err(ClsError::InvalidConfig(format!(
                    "duplicate Service Manager credentials for region {}",
                    creds.region
                )));
            }
        }

        Ok(())
    }
}

impl Credentials {
    pub fn new(
        region: impl Into<String>,
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            url: url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.region.is_empty() {
            return Err("no region".to_string());
        }
        validate_region(&self.region)?;
        if self.url.is_empty() {
            return Err("no URL".to_string());
        }
        if self.username.is_empty() {
            return Err("no username".to_string());
        }
        if self.password.is_empty() {
            return Err("no password".to_string());
        }
        Ok(())
    }
}

fn validate_region(region: &str) -> std::result::Result<(), String> {
    if SUPPORTED_REGIONS.contains(&region) {
        return Ok(());
    }
    Err(format!(
        "unsupported region: {} ({} supported only)",
        region,
        SUPPORTED_REGIONS.join(",")
    ))
}

/// Resolve the credentials record for a region
pub fn find_credentials<'a>(
    config: &'a ServiceManagerConfig,
    region: &str,
) -> Result<&'a Credentials> {
    config
        .credentials
        .iter()
        .find(|c| c.region == region)
        .ok_or_else(|| ClsError::CredentialsNotFound(region.to_string()))
}
