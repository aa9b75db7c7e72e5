// Driver package / 驱动包
pub mod local;
pub mod s3;

use std::sync::Arc;

use crate::storage::FileIORegistry;

/// Register all scheme loaders to FileIORegistry / 注册所有加载器
pub async fn register_all(registry: &FileIORegistry) -> anyhow::Result<()> {
    // Register local filesystem (built in) / 注册本地文件系统
    registry.register_loader(Arc::new(crate::storage::LocalFileIOLoader)).await;
    // Register S3 object storage (plugin, loaded on first use) / 注册S3对象存储
    registry.register_loader(Arc::new(s3::S3Loader::new())).await;
    Ok(())
}
