//! S3插件配置

use anyhow::{anyhow, Result};
use yaolist_fileio::drivers::s3::{S3_ACCESS_KEY, S3_SECRET_KEY};
use yaolist_fileio::Options;

pub const S3_SESSION_TOKEN: &str = "s3.session-token";
pub const S3_ENDPOINT: &str = "s3.endpoint";
pub const S3_REGION: &str = "s3.region";
pub const S3_PATH_STYLE: &str = "s3.path-style-access";

/// S3配置
#[derive(Clone, PartialEq, Eq)]
pub struct S3Config {
    /// S3端点地址
    /// AWS: https://s3.{region}.amazonaws.com
    /// MinIO: http://localhost:9000
    pub endpoint: String,
    /// 区域
    pub region: String,
    /// None means anonymous access / 为空时匿名访问
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Session Token（用于临时凭证）
    pub session_token: Option<String>,
    /// 强制使用路径风格（而非虚拟主机风格）
    /// MinIO等需要设置为true
    pub force_path_style: bool,
}

fn non_empty(options: &Options, key: &str) -> Option<String> {
    options
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl S3Config {
    /// Read `s3.*` keys from options / 从配置项解析
    pub fn from_options(options: &Options) -> Result<Self> {
        let region = non_empty(options, S3_REGION).unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = non_empty(options, S3_ENDPOINT)
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", region));
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(anyhow!("{} must be an http(s) URL: {}", S3_ENDPOINT, endpoint));
        }

        let access_key_id = non_empty(options, S3_ACCESS_KEY);
        let secret_access_key = non_empty(options, S3_SECRET_KEY);
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(anyhow!("{} and {} must be set together", S3_ACCESS_KEY, S3_SECRET_KEY));
        }

        let force_path_style = match options.get(S3_PATH_STYLE) {
            None => false,
            Some(_) => options
                .get_bool(S3_PATH_STYLE)
                .ok_or_else(|| anyhow!("{} must be true or false", S3_PATH_STYLE))?,
        };

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region,
            access_key_id,
            secret_access_key,
            session_token: non_empty(options, S3_SESSION_TOKEN),
            force_path_style,
        })
    }
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("force_path_style", &self.force_path_style)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = S3Config::from_options(&Options::new()).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.endpoint, "https://s3.us-east-1.amazonaws.com");
        assert!(config.access_key_id.is_none());
        assert!(!config.force_path_style);
    }

    #[test]
    fn test_minio_style() {
        let options: Options = [
            (S3_ENDPOINT, "http://localhost:9000/"),
            (S3_REGION, "cn-hangzhou"),
            (S3_ACCESS_KEY, "AK1"),
            (S3_SECRET_KEY, "SK1"),
            (S3_PATH_STYLE, "true"),
        ]
        .into_iter()
        .collect();
        let config = S3Config::from_options(&options).unwrap();
        assert_eq!(config.endpoint, "http://localhost:9000");
        assert_eq!(config.access_key_id.as_deref(), Some("AK1"));
        assert!(config.force_path_style);
        assert!(!format!("{:?}", config).contains("SK1"));
    }

    #[test]
    fn test_rejects_malformed() {
        let half: Options = [(S3_ACCESS_KEY, "AK1")].into_iter().collect();
        assert!(S3Config::from_options(&half).is_err());

        let endpoint: Options = [(S3_ENDPOINT, "minio:9000")].into_iter().collect();
        assert!(S3Config::from_options(&endpoint).is_err());

        let style: Options = [(S3_PATH_STYLE, "maybe")].into_iter().collect();
        assert!(S3Config::from_options(&style).is_err());
    }
}
