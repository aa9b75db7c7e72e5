use async_trait::async_trait;
use anyhow::Result;

use super::{CredentialProvider, Credentials};

/// Variable name pairs, in lookup order / 环境变量名
const ENV_KEY_PAIRS: &[(&str, &str)] = &[
    ("AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"),
    ("AWS_ACCESS_KEY", "AWS_SECRET_KEY"),
];

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Credentials from environment variables / 环境变量凭证
pub struct EnvironmentProvider {
    lookup: Lookup,
}

impl EnvironmentProvider {
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    /// Custom variable source / 自定义变量来源
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl Default for EnvironmentProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for EnvironmentProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn probe(&self) -> Result<Option<Credentials>> {
        for (access_var, secret_var) in ENV_KEY_PAIRS {
            if let (Some(access), Some(secret)) = (self.read(access_var), self.read(secret_var)) {
                return Ok(Some(Credentials::new(access, secret)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider(vars: &[(&str, &str)]) -> EnvironmentProvider {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        EnvironmentProvider::with_lookup(move |key| vars.get(key).cloned())
    }

    #[tokio::test]
    async fn test_standard_names() {
        let p = provider(&[("AWS_ACCESS_KEY_ID", "ENV_AK"), ("AWS_SECRET_ACCESS_KEY", "ENV_SK")]);
        let creds = p.probe().await.unwrap().unwrap();
        assert_eq!(creds, Credentials::new("ENV_AK", "ENV_SK"));
    }

    #[tokio::test]
    async fn test_legacy_names_and_precedence() {
        let p = provider(&[("AWS_ACCESS_KEY", "OLD_AK"), ("AWS_SECRET_KEY", "OLD_SK")]);
        assert_eq!(p.probe().await.unwrap().unwrap().access_key, "OLD_AK");

        let p = provider(&[
            ("AWS_ACCESS_KEY", "OLD_AK"),
            ("AWS_SECRET_KEY", "OLD_SK"),
            ("AWS_ACCESS_KEY_ID", "NEW_AK"),
            ("AWS_SECRET_ACCESS_KEY", "NEW_SK"),
        ]);
        assert_eq!(p.probe().await.unwrap().unwrap().access_key, "NEW_AK");
    }

    #[tokio::test]
    async fn test_partial_or_blank_is_missing() {
        let p = provider(&[("AWS_ACCESS_KEY_ID", "ENV_AK")]);
        assert!(p.probe().await.unwrap().is_none());

        let p = provider(&[("AWS_ACCESS_KEY_ID", "ENV_AK"), ("AWS_SECRET_ACCESS_KEY", "  ")]);
        assert!(p.probe().await.unwrap().is_none());
    }
}
