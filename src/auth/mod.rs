//! Credential types and resolution.
//!
//! Precedence is fixed: an explicit per-call credential wins over the process
//! environment, which wins over the client-configured default. Secret
//! material is held behind `secrecy` so it never lands in debug output.

use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;
use crate::types::{ModelInfo, ProviderId};

/// AWS credential tuple for signed requests.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
    pub region: String,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
            session_token: None,
            region: region.into(),
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(SecretString::from(token.into()));
        self
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Per-provider credential: a bearer API key, or the AWS tuple for
/// SigV4-signed requests.
#[derive(Clone)]
pub enum Credentials {
    ApiKey(SecretString),
    Aws(AwsCredentials),
}

impl Credentials {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(SecretString::from(key.into()))
    }

    /// The bearer key, when this is an API-key credential.
    pub fn bearer(&self) -> Result<&str, LlmError> {
        match self {
            Self::ApiKey(key) => Ok(key.expose_secret()),
            Self::Aws(_) => Err(LlmError::ConfigurationError(
                "expected an API key credential, found AWS credentials".to_string(),
            )),
        }
    }

    /// The AWS tuple, when this is an AWS credential.
    pub fn aws(&self) -> Result<&AwsCredentials, LlmError> {
        match self {
            Self::Aws(creds) => Ok(creds),
            Self::ApiKey(_) => Err(LlmError::ConfigurationError(
                "expected AWS credentials, found an API key".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("Credentials::ApiKey(…)"),
            Self::Aws(aws) => f.debug_tuple("Credentials::Aws").field(aws).finish(),
        }
    }
}

/// Resolves the credential for one call.
///
/// `explicit` comes from the call options, `default` from client
/// configuration. The environment lookup uses the model's `credential_env`
/// for API-key providers and the standard `AWS_*` variables for Bedrock.
pub fn resolve_credentials(
    model: &ModelInfo,
    explicit: Option<&Credentials>,
    default: Option<&Credentials>,
) -> Result<Credentials, LlmError> {
    if let Some(creds) = explicit {
        return Ok(creds.clone());
    }
    if let Some(creds) = from_env(model) {
        return Ok(creds);
    }
    if let Some(creds) = default {
        return Ok(creds.clone());
    }
    Err(LlmError::ConfigurationError(format!(
        "no credentials for {}/{}; set {} or pass credentials explicitly",
        model.provider,
        model.id,
        model
            .credential_env
            .as_deref()
            .unwrap_or("an explicit credential"),
    )))
}

fn from_env(model: &ModelInfo) -> Option<Credentials> {
    match model.provider {
        ProviderId::Bedrock => {
            let access_key = non_empty_var("AWS_ACCESS_KEY_ID")?;
            let secret_key = non_empty_var("AWS_SECRET_ACCESS_KEY")?;
            let region = non_empty_var("AWS_REGION")
                .or_else(|| non_empty_var("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|| "us-east-1".to_string());
            let mut creds = AwsCredentials::new(access_key, secret_key, region);
            if let Some(token) = non_empty_var("AWS_SESSION_TOKEN") {
                creds = creds.with_session_token(token);
            }
            Some(Credentials::Aws(creds))
        }
        _ => {
            let var = model.credential_env.as_deref()?;
            non_empty_var(var).map(Credentials::api_key)
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
