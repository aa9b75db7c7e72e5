use async_trait::async_trait;
use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use std::ops::Range;

use crate::options::Options;

/// File entry information / 文件条目信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<String>,
}

/// One (key, display key) pair a caller must supply / 必填配置项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredOption {
    pub key: String,
    pub display_key: String,
}

impl RequiredOption {
    pub fn new(key: &str, display_key: &str) -> Self {
        Self {
            key: key.to_string(),
            display_key: display_key.to_string(),
        }
    }
}

/// Filesystem capability interface (provides only primitive operations) / 文件系统能力接口
///
/// Every backend, loaded from a plugin or built in, implements this surface.
#[async_trait]
pub trait FileIO: Send + Sync {
    /// Object stores lack atomic rename/overwrite / 是否为对象存储
    fn is_object_store(&self) -> bool;

    /// Apply options before first use / 应用配置
    async fn configure(&mut self, options: &Options) -> Result<()> {
        let _ = options;
        Ok(())
    }

    /// Open file reader (supports range reading) / 打开文件读取器
    async fn open_reader(
        &self,
        path: &str,
        range: Option<Range<u64>>,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>>;

    /// Open file writer / 打开文件写入器
    /// Fails when the file exists and `overwrite` is false
    async fn open_writer(
        &self,
        path: &str,
        overwrite: bool,
    ) -> Result<Box<dyn AsyncWrite + Unpin + Send>>;

    /// Get file or directory status / 获取文件状态
    async fn get_status(&self, path: &str) -> Result<Entry>;

    /// List directory contents / 列出目录内容
    async fn list(&self, path: &str) -> Result<Vec<Entry>>;

    /// Check if path exists / 判断路径是否存在
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Delete file or directory, returns false when nothing was deleted / 删除文件或目录
    async fn delete(&self, path: &str, recursive: bool) -> Result<bool>;

    /// Create directory (with parents) / 创建目录
    async fn create_dir(&self, path: &str) -> Result<bool>;

    /// Rename file or directory / 重命名文件或目录
    async fn rename(&self, src: &str, dst: &str) -> Result<bool>;

    /// Read a whole file / 读取完整文件
    async fn read_bytes(&self, path: &str) -> Result<Bytes> {
        use tokio::io::AsyncReadExt;
        let mut reader = self.open_reader(path, None).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Write a whole file / 写入完整文件
    async fn write_bytes(&self, path: &str, data: Bytes, overwrite: bool) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let mut writer = self.open_writer(path, overwrite).await?;
        writer.write_all(&data).await?;
        // 必须调用shutdown确保所有数据写入完成
        writer.shutdown().await?;
        Ok(())
    }
}

pub mod registry;
pub mod delegate;
pub mod local_loader;

pub use registry::{FileIOLoader, FileIORegistry, FileIOBox, scheme_of};
pub use delegate::{PluginFileIO, PluginDescriptor, CredentialKeys, InitState};
pub use local_loader::LocalFileIOLoader;
