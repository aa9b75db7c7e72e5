//! S3 scheme loader / S3加载器
//!
//! The S3 implementation lives in the `yaolist-plugin-s3` library and is only
//! loaded on first use, so the host never links the S3 SDK itself.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config;
use crate::credentials::{CredentialChain, CredentialResolver};
use crate::error::FsError;
use crate::options::Options;
use crate::storage::{
    CredentialKeys, FileIO, FileIOLoader, PluginDescriptor, PluginFileIO, RequiredOption,
};

pub const S3_SCHEME: &str = "s3";

/// Plugin sub-directory under the plugin root / 插件目录名
pub const S3_PLUGIN_DIR: &str = "yaolist-plugin-s3";

/// Implementation id exported by the plugin / 插件实现标识
pub const S3_IMPLEMENTATION: &str = "yaolist.s3.S3FileIO";

pub const S3_ACCESS_KEY: &str = "s3.access-key";

pub const S3_SECRET_KEY: &str = "s3.secret-key";

/// S3 loader: negotiates required options and hands out lazy plugin FileIOs / S3加载器
pub struct S3Loader {
    descriptor: PluginDescriptor,
    resolver: Arc<dyn CredentialResolver>,
}

impl S3Loader {
    /// Loader using the default credential chain from config / 默认凭证链
    pub fn new() -> Self {
        let chain = CredentialChain::from_config(&config::config());
        Self::with_resolver(Arc::new(chain))
    }

    pub fn with_resolver(resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            descriptor: Self::default_descriptor(),
            resolver,
        }
    }

    /// Override where the plugin is looked up / 自定义插件目录
    pub fn with_module_directory(mut self, module_directory: &str) -> Self {
        self.descriptor.module_directory = module_directory.to_string();
        self
    }

    pub fn default_descriptor() -> PluginDescriptor {
        PluginDescriptor {
            scheme: S3_SCHEME.to_string(),
            implementation_id: S3_IMPLEMENTATION.to_string(),
            module_directory: S3_PLUGIN_DIR.to_string(),
            object_store: true,
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }
}

impl Default for S3Loader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileIOLoader for S3Loader {
    fn scheme(&self) -> &'static str {
        S3_SCHEME
    }

    async fn required_options(&self) -> Vec<RequiredOption> {
        // Keys are only mandatory when nothing ambient was found / 无环境凭证时才要求显式配置
        match self.resolver.resolve().await {
            Some(_) => Vec::new(),
            None => vec![
                RequiredOption::new(S3_ACCESS_KEY, S3_ACCESS_KEY),
                RequiredOption::new(S3_SECRET_KEY, S3_SECRET_KEY),
            ],
        }
    }

    fn load(&self, path: &str, options: Options) -> Result<Box<dyn FileIO>, FsError> {
        tracing::debug!("S3 FileIO handle created for {}", path);
        let fileio = PluginFileIO::new(self.descriptor.clone(), options, self.resolver.clone())
            .with_credential_keys(CredentialKeys {
                access_key: S3_ACCESS_KEY.to_string(),
                secret_key: S3_SECRET_KEY.to_string(),
            });
        Ok(Box::new(fileio))
    }
}
