use async_trait::async_trait;
use anyhow::Result;
use std::path::PathBuf;

use super::{CredentialProvider, Credentials};

const DEFAULT_PROFILE: &str = "default";

/// Credentials from the shared credentials file / 凭证配置文件
///
/// INI format, e.g. `~/.aws/credentials`:
/// ```text
/// [default]
/// aws_access_key_id = AKID
/// aws_secret_access_key = SECRET
/// ```
pub struct ProfileProvider {
    path: Option<PathBuf>,
    profile: String,
}

impl ProfileProvider {
    pub fn new(path: impl Into<PathBuf>, profile: &str) -> Self {
        Self {
            path: Some(path.into()),
            profile: profile.to_string(),
        }
    }

    /// Path from AWS_SHARED_CREDENTIALS_FILE or home dir, profile from AWS_PROFILE / 从环境变量确定文件和profile
    pub fn from_env() -> Self {
        let path = std::env::var("AWS_SHARED_CREDENTIALS_FILE")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| home_dir().map(|h| h.join(".aws").join("credentials")));
        let profile = std::env::var("AWS_PROFILE")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
        Self { path, profile }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Extract key pair of one profile from INI content / 解析profile
pub fn parse_profile(content: &str, profile: &str) -> Option<Credentials> {
    let mut in_section = false;
    let mut access_key = None;
    let mut secret_key = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim();
            // config-file style "[profile name]" is accepted too
            let name = name.strip_prefix("profile ").map(str::trim).unwrap_or(name);
            in_section = name == profile;
            continue;
        }

        if !in_section {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "aws_access_key_id" => access_key = Some(value),
                "aws_secret_access_key" => secret_key = Some(value),
                _ => {}
            }
        }
    }

    match (access_key, secret_key) {
        (Some(a), Some(s)) => Some(Credentials::new(a, s)).filter(Credentials::is_complete),
        _ => None,
    }
}

#[async_trait]
impl CredentialProvider for ProfileProvider {
    fn name(&self) -> &'static str {
        "profile"
    }

    async fn probe(&self) -> Result<Option<Credentials>> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(None),
        };
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_profile(&content, &self.profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# shared credentials
[default]
aws_access_key_id = DEFAULT_AK
aws_secret_access_key=DEFAULT_SK

[profile dev]
aws_access_key_id = DEV_AK
; secret missing on purpose

[prod]
AWS_ACCESS_KEY_ID = PROD_AK
aws_secret_access_key = PROD_SK
region = eu-west-1
";

    #[test]
    fn test_parse_profile() {
        assert_eq!(parse_profile(SAMPLE, "default"), Some(Credentials::new("DEFAULT_AK", "DEFAULT_SK")));
        assert_eq!(parse_profile(SAMPLE, "prod"), Some(Credentials::new("PROD_AK", "PROD_SK")));
        assert_eq!(parse_profile(SAMPLE, "dev"), None);
        assert_eq!(parse_profile(SAMPLE, "missing"), None);
    }

    #[tokio::test]
    async fn test_probe_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, SAMPLE).unwrap();

        let creds = ProfileProvider::new(&path, "prod").probe().await.unwrap();
        assert_eq!(creds.unwrap().secret_key, "PROD_SK");

        let missing = ProfileProvider::new(dir.path().join("nope"), "default");
        assert!(missing.probe().await.unwrap().is_none());
    }
}
