use async_trait::async_trait;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::time::Duration;

use super::{CredentialProvider, Credentials};

const CONTAINER_ENDPOINT: &str = "http://169.254.170.2";
const TOKEN_PATH: &str = "/latest/api/token";
const ROLE_PATH: &str = "/latest/meta-data/iam/security-credentials/";
const TOKEN_TTL_SECONDS: &str = "21600";

/// Credential document returned by container and instance endpoints / 元数据凭证响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataCredentials {
    access_key_id: String,
    secret_access_key: String,
}

/// Credentials from container or EC2 instance metadata / 实例元数据凭证
pub struct InstanceMetadataProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl InstanceMetadataProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn metadata_disabled() -> bool {
        std::env::var("AWS_EC2_METADATA_DISABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// ECS/container credentials endpoint, if the environment names one / 容器凭证地址
    fn container_uri() -> Option<String> {
        if let Ok(full) = std::env::var("AWS_CONTAINER_CREDENTIALS_FULL_URI") {
            if !full.is_empty() {
                return Some(full);
            }
        }
        std::env::var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI")
            .ok()
            .filter(|r| !r.is_empty())
            .map(|r| format!("{}{}", CONTAINER_ENDPOINT, r))
    }

    async fn fetch_container(&self, uri: &str) -> Result<Credentials> {
        let mut request = self.client.get(uri);
        if let Ok(token) = std::env::var("AWS_CONTAINER_AUTHORIZATION_TOKEN") {
            request = request.header("Authorization", token);
        }
        let doc: MetadataCredentials = request.send().await?.error_for_status()?.json().await?;
        Ok(Credentials::new(doc.access_key_id, doc.secret_access_key))
    }

    /// IMDSv2: session token, role name, then role credentials / 获取EC2实例凭证
    async fn fetch_instance(&self) -> Result<Option<Credentials>> {
        let token = self.client
            .put(format!("{}{}", self.endpoint, TOKEN_PATH))
            .header("X-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECONDS)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let roles = self.client
            .get(format!("{}{}", self.endpoint, ROLE_PATH))
            .header("X-aws-ec2-metadata-token", &token)
            .send()
            .await?;
        if roles.status() == reqwest::StatusCode::NOT_FOUND {
            // instance has no role attached
            return Ok(None);
        }
        let roles = roles.error_for_status()?.text().await?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| anyhow!("Empty role list from instance metadata"))?;

        let doc: MetadataCredentials = self.client
            .get(format!("{}{}{}", self.endpoint, ROLE_PATH, role))
            .header("X-aws-ec2-metadata-token", &token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Some(Credentials::new(doc.access_key_id, doc.secret_access_key)))
    }
}

#[async_trait]
impl CredentialProvider for InstanceMetadataProvider {
    fn name(&self) -> &'static str {
        "instance-metadata"
    }

    async fn probe(&self) -> Result<Option<Credentials>> {
        if let Some(uri) = Self::container_uri() {
            return self.fetch_container(&uri).await.map(Some);
        }
        if Self::metadata_disabled() {
            return Ok(None);
        }
        self.fetch_instance().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metadata_document() {
        let body = r#"{
            "Code": "Success",
            "Type": "AWS-HMAC",
            "AccessKeyId": "ASIAEXAMPLE",
            "SecretAccessKey": "secret",
            "Token": "token",
            "Expiration": "2026-10-18T12:00:00Z"
        }"#;
        let doc: MetadataCredentials = serde_json::from_str(body).unwrap();
        assert_eq!(doc.access_key_id, "ASIAEXAMPLE");
        assert_eq!(doc.secret_access_key, "secret");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        // port 9 (discard) on localhost is expected to refuse connections
        let provider = InstanceMetadataProvider::new("http://127.0.0.1:9", Duration::from_millis(200));
        assert!(provider.fetch_instance().await.is_err());
    }
}
