use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use async_trait::async_trait;
use url::Url;

use super::{FileIO, RequiredOption};
use crate::error::FsError;
use crate::options::Options;

pub type FileIOBox = Arc<dyn FileIO>;

/// FileIO loader trait, one per URI scheme / 文件系统加载器 trait
#[async_trait]
pub trait FileIOLoader: Send + Sync {
    /// Scheme name (lowercase) / 协议名
    fn scheme(&self) -> &'static str;

    /// Keys the caller must supply right now.
    /// May change with the runtime environment, so never cache it / 当前必填配置项
    async fn required_options(&self) -> Vec<RequiredOption>;

    /// Create the FileIO for a path / 创建文件系统实例
    fn load(&self, path: &str, options: Options) -> Result<Box<dyn FileIO>, FsError>;
}

/// FileIO registry (scheme -> loader) / 文件系统注册表
#[derive(Clone, Default)]
pub struct FileIORegistry {
    loaders: Arc<RwLock<HashMap<String, Arc<dyn FileIOLoader>>>>,
}

impl FileIORegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register loader, replacing any loader with the same scheme / 注册加载器
    pub async fn register_loader(&self, loader: Arc<dyn FileIOLoader>) {
        let scheme = loader.scheme().to_string();
        let mut loaders = self.loaders.write().await;
        if loaders.insert(scheme.clone(), loader).is_some() {
            tracing::warn!("FileIO loader replaced: {}", scheme);
        } else {
            tracing::info!("FileIO loader registered: {}", scheme);
        }
    }

    /// Get loader for scheme / 获取加载器
    pub async fn get_loader(&self, scheme: &str) -> Result<Arc<dyn FileIOLoader>, FsError> {
        let loaders = self.loaders.read().await;
        loaders
            .get(&scheme.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| FsError::UnsupportedScheme(scheme.to_string()))
    }

    /// List all registered schemes / 列出所有协议
    pub async fn list_schemes(&self) -> Vec<String> {
        let loaders = self.loaders.read().await;
        let mut schemes: Vec<String> = loaders.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Required options for scheme, re-negotiated on every call / 获取必填配置项
    pub async fn required_options(&self, scheme: &str) -> Result<Vec<RequiredOption>, FsError> {
        let loader = self.get_loader(scheme).await?;
        Ok(loader.required_options().await)
    }

    /// Check caller options against the current required keys / 校验配置
    pub async fn validate(&self, scheme: &str, options: &Options) -> Result<(), FsError> {
        let required = self.required_options(scheme).await?;
        let missing: Vec<String> = required
            .into_iter()
            .filter(|opt| !options.contains_key(&opt.key))
            .map(|opt| opt.display_key)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            tracing::warn!("Options validation failed for {}: missing {:?}", scheme, missing);
            Err(FsError::ConfigurationValidation {
                scheme: scheme.to_string(),
                missing,
            })
        }
    }

    /// Dispatch a URI to its loader without validation / 根据URI加载文件系统
    pub async fn load(&self, uri: &str, options: Options) -> Result<FileIOBox, FsError> {
        let scheme = scheme_of(uri)?;
        let loader = self.get_loader(&scheme).await?;
        let fileio = loader.load(uri, options)?;
        Ok(Arc::from(fileio))
    }

    /// Validate options, then load / 校验后加载
    pub async fn create(&self, uri: &str, options: Options) -> Result<FileIOBox, FsError> {
        let scheme = scheme_of(uri)?;
        self.validate(&scheme, &options).await?;
        self.load(uri, options).await
    }
}

/// Extract the scheme of a URI; bare paths map to "file" / 解析URI协议
pub fn scheme_of(uri: &str) -> Result<String, FsError> {
    match Url::parse(uri) {
        // Windows drive letters parse as one-letter schemes / 盘符按本地路径处理
        Ok(url) if url.scheme().len() == 1 => Ok("file".to_string()),
        Ok(url) => Ok(url.scheme().to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok("file".to_string()),
        Err(e) => Err(FsError::InvalidUri(format!("{}: {}", uri, e))),
    }
}
