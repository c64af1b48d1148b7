//! SSM Parameter Store adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::client::{AwsError, AwsJsonClient};

/// Source of secret configuration values.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Read a parameter, decrypting it if it is a `SecureString`.
    async fn get_secret(&self, name: &str) -> Result<String, AwsError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetParameterRequest<'a> {
    name: &'a str,
    with_decryption: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParameterResponse {
    parameter: Parameter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Parameter {
    value: String,
}

/// Parameter store backed by AWS Systems Manager.
#[derive(Clone)]
pub struct SsmParameterStore {
    client: AwsJsonClient,
}

impl SsmParameterStore {
    pub fn new(client: AwsJsonClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get_secret(&self, name: &str) -> Result<String, AwsError> {
        let request = GetParameterRequest {
            name,
            with_decryption: true,
        };

        let response: GetParameterResponse = self
            .client
            .call("ssm", "AmazonSSM.GetParameter", &request)
            .await?;

        info!(parameter = name, "ssm_parameter_retrieved");

        Ok(response.parameter.value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::body::Bytes;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;
    use serde_json::Value;

    use super::*;
    use crate::config::AwsSettings;
    use crate::testing::serve;

    #[test]
    fn test_request_shape() {
        let request = GetParameterRequest {
            name: "GitHubOAuthToken",
            with_decryption: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"Name": "GitHubOAuthToken", "WithDecryption": true})
        );
    }

    #[test]
    fn test_response_shape() {
        let body = r#"{
            "Parameter": {
                "Name": "GitHubOAuthToken",
                "Type": "SecureString",
                "Value": "ghp_example",
                "Version": 3
            }
        }"#;
        let response: GetParameterResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.parameter.value, "ghp_example");
    }

    #[tokio::test]
    async fn test_get_secret_wire_contract() {
        let seen: Arc<Mutex<Option<(String, Value)>>> = Arc::new(Mutex::new(None));
        let recorder = seen.clone();
        let app = Router::new().route(
            "/",
            post(move |headers: HeaderMap, body: Bytes| {
                let recorder = recorder.clone();
                async move {
                    let target = headers
                        .get("x-amz-target")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                    *recorder.lock().unwrap() = Some((target, body));
                    r#"{"Parameter": {"Name": "GitHubOAuthToken", "Value": "ghp_live"}}"#
                }
            }),
        );
        let addr = serve(app).await;

        let settings = AwsSettings {
            region: "us-east-1".to_string(),
            endpoint_url: Some(format!("http://{}", addr)),
            access_key_id: Some("AKID".to_string()),
            secret_access_key: Some("secret".to_string()),
            ..AwsSettings::default()
        };
        let client = AwsJsonClient::new(&settings, Duration::from_secs(5)).unwrap();
        let store = SsmParameterStore::new(client);

        let value = store.get_secret("GitHubOAuthToken").await.unwrap();
        assert_eq!(value, "ghp_live");

        let (target, body) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(target, "AmazonSSM.GetParameter");
        assert_eq!(
            body,
            serde_json::json!({"Name": "GitHubOAuthToken", "WithDecryption": true})
        );
    }
}
