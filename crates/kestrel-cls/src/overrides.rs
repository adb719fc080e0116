//! Binding secrets codec
//!
//! Binding credentials are stored on the operation only as ciphertext:
//! AES-256-GCM with a key derived from the process secret key, base64
//! encoded as `nonce || ciphertext`. Plaintext exists only in memory while
//! a step renders the fluent-bit output configuration.

use crate::error::{ClsError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use minijinja::{context, Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fluent-bit output template, compiled into the binary
const EXTRA_CONF_TEMPLATE: &str = include_str!("../templates/fluent-bit-output.conf");

const NONCE_LEN: usize = 12;

/// Override key disabling the legacy forward output
pub const FORWARD_ENABLED_KEY: &str = "fluent-bit.config.outputs.forward.enabled";

/// Override key carrying the rendered CLS output
pub const ADDITIONAL_OUTPUTS_KEY: &str = "fluent-bit.config.outputs.additional";

/// Secret connection parameters produced by a binding
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverrideParams {
    #[serde(rename = "Fluentd-endpoint")]
    pub fluentd_endpoint: String,
    #[serde(rename = "Fluentd-password")]
    pub fluentd_password: String,
    #[serde(rename = "Fluentd-username")]
    pub fluentd_username: String,
    #[serde(rename = "Kibana-endpoint")]
    pub kibana_url: String,
}

impl std::fmt::Debug for OverrideParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideParams")
            .field("fluentd_endpoint", &self.fluentd_endpoint)
            .field("fluentd_username", &self.fluentd_username)
            .field("fluentd_password", &"<redacted>")
            .field("kibana_url", &self.kibana_url)
            .finish()
    }
}

/// Binding credential map as returned by the Service Manager
#[derive(Debug, Deserialize)]
struct BindingCredentials {
    #[serde(rename = "Fluentd-endpoint")]
    fluentd_endpoint: Option<String>,
    #[serde(rename = "Fluentd-password")]
    fluentd_password: Option<String>,
    #[serde(rename = "Fluentd-username")]
    fluentd_username: Option<String>,
    #[serde(rename = "Kibana-endpoint")]
    kibana_url: Option<String>,
}

impl OverrideParams {
    /// Extract the four expected string credentials from a binding response
    pub fn from_credentials(
        credentials: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self> {
        let parsed: BindingCredentials =
            serde_json::from_value(serde_json::Value::Object(credentials.clone()))
                .map_err(|e| ClsError::InvalidCredentials(e.to_string()))?;

        Ok(Self {
            fluentd_endpoint: parsed
                .fluentd_endpoint
                .ok_or(ClsError::MissingCredential("Fluentd-endpoint"))?,
            fluentd_password: parsed
                .fluentd_password
                .ok_or(ClsError::MissingCredential("Fluentd-password"))?,
            fluentd_username: parsed
                .fluentd_username
                .ok_or(ClsError::MissingCredential("Fluentd-username"))?,
            kibana_url: parsed
                .kibana_url
                .ok_or(ClsError::MissingCredential("Kibana-endpoint"))?,
        })
    }
}

fn cipher(secret_key: &str) -> Result<Aes256Gcm> {
    if secret_key.is_empty() {
        return Err(ClsError::InvalidSecretKey("secret key is empty".to_string()));
    }
    let key = Sha256::digest(secret_key.as_bytes());
    Aes256Gcm::new_from_slice(&key).map_err(|e| ClsError::InvalidSecretKey(e.to_string()))
}

/// Serialize and encrypt override parameters
pub fn encrypt_overrides(secret_key: &str, params: &OverrideParams) -> Result<String> {
    let cipher = cipher(secret_key)?;
    let plaintext = serde_json::to_vec(params)?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_slice())
        .map_err(|e| ClsError::Encryption(e.to_string()))?;

    let mut combined = nonce.to_vec();
    combined.extend_from_slice(&ciphertext);
    Ok(general_purpose::STANDARD.encode(combined))
}

/// Decrypt and deserialize override parameters
pub fn decrypt_overrides(secret_key: &str, encrypted: &str) -> Result<OverrideParams> {
    let cipher = cipher(secret_key)?;

    let combined = general_purpose::STANDARD
        .decode(encrypted)
        .map_err(|e| ClsError::Decryption(format!("base64 decode failed: {}", e)))?;
    if combined.len() <= NONCE_LEN {
        return Err(ClsError::Decryption("ciphertext too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| ClsError::Decryption("authentication failed".to_string()))?;

    serde_json::from_slice(&plaintext)
        .map_err(|e| ClsError::Decryption(format!("malformed plaintext: {}", e)))
}

/// Built-in fluent-bit output template
pub fn get_extra_conf_template() -> &'static str {
    EXTRA_CONF_TEMPLATE
}

/// Render override parameters into a configuration snippet
pub fn render_overrides(params: &OverrideParams, template: &str) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let rendered = env.render_str(
        template,
        context! {
            fluentd_endpoint => &params.fluentd_endpoint,
            fluentd_username => &params.fluentd_username,
            fluentd_password => &params.fluentd_password,
            kibana_url => &params.kibana_url,
        },
    )?;
    Ok(rendered)
}

/// Overrides applied to the logging component once CLS is bound
pub fn fluent_bit_overrides(rendered: String) -> Vec<(String, String)> {
    vec![
        (FORWARD_ENABLED_KEY.to_string(), "false".to_string()),
        (ADDITIONAL_OUTPUTS_KEY.to_string(), rendered),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "test_secret_key_for_encryption";

    fn params() -> OverrideParams {
        OverrideParams {
            fluentd_endpoint: "fluentd.cls.example.com".to_string(),
            fluentd_password: "s3cr3t".to_string(),
            fluentd_username: "fluent".to_string(),
            kibana_url: "https://kibana.cls.example.com".to_string(),
        }
    }

    fn credentials(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let encrypted = encrypt_overrides(KEY, &params()).unwrap();
        assert!(!encrypted.contains("s3cr3t"));

        let decrypted = decrypt_overrides(KEY, &encrypted).unwrap();
        assert_eq!(decrypted, params());
    }

    #[test]
    fn test_encrypt_uses_fresh_nonce() {
        let a = encrypt_overrides(KEY, &params()).unwrap();
        let b = encrypt_overrides(KEY, &params()).unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt_overrides(KEY, &a).unwrap(), decrypt_overrides(KEY, &b).unwrap());
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let encrypted = encrypt_overrides(KEY, &params()).unwrap();
        let err = decrypt_overrides("another-key", &encrypted).unwrap_err();
        assert!(matches!(err, ClsError::Decryption(_)));
    }

    #[test]
    fn test_decrypt_truncated_fails() {
        let encrypted = encrypt_overrides(KEY, &params()).unwrap();
        let mut raw = general_purpose::STANDARD.decode(&encrypted).unwrap();
        raw.truncate(raw.len() - 4);
        let truncated = general_purpose::STANDARD.encode(raw);

        assert!(matches!(
            decrypt_overrides(KEY, &truncated),
            Err(ClsError::Decryption(_))
        ));

        let short = general_purpose::STANDARD.encode([0u8; 8]);
        let err = decrypt_overrides(KEY, &short).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_decrypt_invalid_base64() {
        let err = decrypt_overrides(KEY, "not-valid-base64!!!").unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn test_empty_secret_key_rejected() {
        assert!(matches!(
            encrypt_overrides("", &params()),
            Err(ClsError::InvalidSecretKey(_))
        ));
        assert!(matches!(
            decrypt_overrides("", "abc"),
            Err(ClsError::InvalidSecretKey(_))
        ));
    }

    #[test]
    fn test_render_overrides() {
        let rendered = render_overrides(&params(), get_extra_conf_template()).unwrap();

        assert!(rendered.contains("Host              fluentd.cls.example.com"));
        assert!(rendered.contains("HTTP_User         fluent"));
        assert!(rendered.contains("HTTP_Passwd       s3cr3t"));
        assert_eq!(rendered, render_overrides(&params(), get_extra_conf_template()).unwrap());
    }

    #[test]
    fn test_render_unknown_variable_fails() {
        let err = render_overrides(&params(), "{{ no_such_field }}").unwrap_err();
        assert!(matches!(err, ClsError::Template(_)));
    }

    #[test]
    fn test_from_credentials() {
        let creds = credentials(json!({
            "Fluentd-endpoint": "fluentd.cls.example.com",
            "Fluentd-password": "s3cr3t",
            "Fluentd-username": "fluent",
            "Kibana-endpoint": "https://kibana.cls.example.com",
            "extra": 42,
        }));
        assert_eq!(OverrideParams::from_credentials(&creds).unwrap(), params());
    }

    #[test]
    fn test_from_credentials_missing_field() {
        let creds = credentials(json!({
            "Fluentd-password": "s3cr3t",
            "Fluentd-username": "fluent",
            "Kibana-endpoint": "https://kibana.cls.example.com",
        }));
        let err = OverrideParams::from_credentials(&creds).unwrap_err();
        assert!(matches!(err, ClsError::MissingCredential("Fluentd-endpoint")));
    }

    #[test]
    fn test_from_credentials_wrong_type() {
        let creds = credentials(json!({
            "Fluentd-endpoint": "fluentd.cls.example.com",
            "Fluentd-password": 1234,
            "Fluentd-username": "fluent",
            "Kibana-endpoint": "https://kibana.cls.example.com",
        }));
        assert!(matches!(
            OverrideParams::from_credentials(&creds),
            Err(ClsError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        assert!(!format!("{:?}", params()).contains("s3cr3t"));
    }

    #[test]
    fn test_fluent_bit_overrides() {
        let overrides = fluent_bit_overrides("rendered".to_string());
        assert_eq!(overrides[0], (FORWARD_ENABLED_KEY.to_string(), "false".to_string()));
        assert_eq!(overrides[1], (ADDITIONAL_OUTPUTS_KEY.to_string(), "rendered".to_string()));
    }
}
