//! # AWS Secrets Manager Provider
//!
//! Resolves remote keys against AWS Secrets Manager.
//!
//! Credentials come from the AWS SDK default chain, which covers IRSA
//! (IAM Roles for Service Accounts) when the pod's service account carries
//! the `eks.amazonaws.com/role-arn` annotation.

use crate::provider::{ProviderError, SecretProvider, SecretValue};
use async_trait::async_trait;
use aws_sdk_secretsmanager::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use std::time::Instant;
use tracing::{debug, info, Instrument};

pub const AWS_PROVIDER_ID: &str = "aws";

/// AWS Secrets Manager provider implementation
pub struct AwsSecretsManager {
    client: SecretsManagerClient,
    region: String,
}

impl std::fmt::Debug for AwsSecretsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSecretsManager")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl AwsSecretsManager {
    /// Create a client for `region` using the default credential chain
    pub async fn new(region: &str) -> Self {
        info!("Initializing AWS Secrets Manager provider in region {}", region);
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        Self {
            client: SecretsManagerClient::new(&sdk_config),
            region: region.to_string(),
        }
    }

    pub fn from_client(client: SecretsManagerClient, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }
}

/// Map an AWS error code onto the provider error taxonomy
pub(crate) fn classify_error(remote_key: &str, code: Option<&str>, message: String) -> ProviderError {
    match code {
        Some("ResourceNotFoundException") => ProviderError::not_found(AWS_PROVIDER_ID, remote_key),
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "InvalidSignatureException"
            | "ExpiredTokenException",
        ) => ProviderError::Unauthorized {
            provider: AWS_PROVIDER_ID.to_string(),
            key: remote_key.to_string(),
            message,
        },
        _ => ProviderError::unavailable(AWS_PROVIDER_ID, message),
    }
}

#[async_trait]
impl SecretProvider for AwsSecretsManager {
    fn id(&self) -> &str {
        AWS_PROVIDER_ID
    }

    async fn resolve(&self, remote_key: &str) -> Result<SecretValue, ProviderError> {
        let span = tracing::debug_span!(
            "aws.secret.get",
            secret.name = remote_key,
            region = %self.region,
            operation.duration_ms = tracing::field::Empty,
        );
        let span_clone = span.clone();
        let start = Instant::now();

        async move {
            let result = self
                .client
                .get_secret_value()
                .secret_id(remote_key)
                .send()
                .await;
            span_clone.record(
                "operation.duration_ms",
                u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            );

            match result {
                Ok(response) => {
                    let value = response
                        .secret_string()
                        .map(ToString::to_string)
                        .or_else(|| {
                            response
                                .secret_binary()
                                .map(|blob| String::from_utf8_lossy(blob.as_ref()).to_string())
                        });
                    debug!(found = value.is_some(), "aws.secret.get.complete");
                    value
                        .map(SecretValue::new)
                        .ok_or_else(|| ProviderError::not_found(AWS_PROVIDER_ID, remote_key))
                }
                Err(e) => {
                    let code = e.code().map(ToString::to_string);
                    Err(classify_error(
                        remote_key,
                        code.as_deref(),
                        DisplayErrorContext(&e).to_string(),
                    ))
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderErrorKind;

    #[test]
    fn test_classify_not_found() {
        let err = classify_error("db", Some("ResourceNotFoundException"), String::new());
        assert_eq!(err.kind(), ProviderErrorKind::NotFound);
    }

    #[test]
    fn test_classify_access_errors() {
        for code in ["AccessDeniedException", "UnrecognizedClientException"] {
            let err = classify_error("db", Some(code), "denied".to_string());
            assert_eq!(err.kind(), ProviderErrorKind::Unauthorized, "{code}");
        }
    }

    #[test]
    fn test_classify_everything_else_unavailable() {
        let err = classify_error("db", Some("ThrottlingException"), "slow down".to_string());
        assert_eq!(err.kind(), ProviderErrorKind::Unavailable);
        let err = classify_error("db", None, "dispatch failure".to_string());
        assert_eq!(err.kind(), ProviderErrorKind::Unavailable);
    }
}
