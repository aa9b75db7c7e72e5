use async_trait::async_trait;
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use std::ops::Range;
use url::Url;

use crate::storage::{FileIO, Entry};

/// Local FileIO, paths are absolute or `file://` URIs / 本地文件系统
#[derive(Debug, Default)]
pub struct LocalFileIO;

impl LocalFileIO {
    pub fn new() -> Self {
        Self
    }

    /// Convert a path or file URI to a local path / 转换为本地路径
    fn to_local_path(&self, path: &str) -> Result<PathBuf> {
        if path.starts_with("file:") {
            let url = Url::parse(path).map_err(|e| anyhow!("Invalid file uri {}: {}", path, e))?;
            return url
                .to_file_path()
                .map_err(|_| anyhow!("Not a local file uri: {}", path));
        }
        Ok(PathBuf::from(path))
    }
}

/// Build entry from metadata / 根据元数据构建条目
fn entry_from_metadata(path: &Path, display_path: String, metadata: &std::fs::Metadata) -> Entry {
    let is_dir = metadata.is_dir();
    let size = if is_dir { 0 } else { metadata.len() };

    let modified = metadata.modified().ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .and_then(|d| chrono::DateTime::from_timestamp(d.as_secs() as i64, 0))
        .map(|dt| dt.to_rfc3339());

    Entry {
        name: path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
        path: display_path,
        is_dir,
        size,
        modified,
    }
}

#[async_trait]
impl FileIO for LocalFileIO {
    fn is_object_store(&self) -> bool {
        false
    }

    async fn open_reader(
        &self,
        path: &str,
        range: Option<Range<u64>>,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        let full_path = self.to_local_path(path)?;
        let range_clone = range.clone();

        let file = tokio::task::spawn_blocking(move || {
            let mut file = std::fs::File::open(&full_path)?;
            if let Some(r) = range_clone {
                use std::io::Seek;
                file.seek(std::io::SeekFrom::Start(r.start))?;
            }
            Ok::<std::fs::File, anyhow::Error>(file)
        }).await??;

        let async_file = tokio::fs::File::from_std(file);

        if let Some(r) = range {
            use tokio::io::AsyncReadExt;
            let limited = async_file.take(r.end.saturating_sub(r.start));
            Ok(Box::new(limited))
        } else {
            Ok(Box::new(async_file))
        }
    }

    async fn open_writer(
        &self,
        path: &str,
        overwrite: bool,
    ) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
        let full_path = self.to_local_path(path)?;
        let display = path.to_string();

        let file = tokio::task::spawn_blocking(move || {
            // Ensure parent directory exists / 确保父目录存在
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = if overwrite {
                std::fs::File::create(&full_path)?
            } else {
                std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&full_path)
                    .map_err(|e| match e.kind() {
                        std::io::ErrorKind::AlreadyExists => anyhow!("File already exists: {}", display),
                        _ => e.into(),
                    })?
            };
            Ok::<std::fs::File, anyhow::Error>(file)
        }).await??;

        Ok(Box::new(tokio::fs::File::from_std(file)))
    }

    async fn get_status(&self, path: &str) -> Result<Entry> {
        let full_path = self.to_local_path(path)?;
        let metadata = tokio::fs::metadata(&full_path).await
            .map_err(|e| anyhow!("Cannot stat {}: {}", path, e))?;
        Ok(entry_from_metadata(&full_path, path.to_string(), &metadata))
    }

    async fn list(&self, path: &str) -> Result<Vec<Entry>> {
        let full_path = self.to_local_path(path)?;
        let metadata = tokio::fs::metadata(&full_path).await?;
        if !metadata.is_dir() {
            return Ok(vec![entry_from_metadata(&full_path, path.to_string(), &metadata)]);
        }

        let mut entries = tokio::fs::read_dir(&full_path).await?;
        let mut result = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            let child = format!("{}/{}", path.trim_end_matches('/'), entry.file_name().to_string_lossy());
            result.push(entry_from_metadata(&entry.path(), child, &metadata));
        }

        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.to_local_path(path)?;
        Ok(tokio::fs::try_exists(full_path).await?)
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<bool> {
        let full_path = self.to_local_path(path)?;
        let metadata = match tokio::fs::symlink_metadata(&full_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            if recursive {
                tokio::fs::remove_dir_all(&full_path).await?;
            } else {
                tokio::fs::remove_dir(&full_path).await
                    .map_err(|e| anyhow!("Cannot delete directory {} non-recursively: {}", path, e))?;
            }
        } else {
            tokio::fs::remove_file(&full_path).await?;
        }

        Ok(true)
    }

    async fn create_dir(&self, path: &str) -> Result<bool> {
        let full_path = self.to_local_path(path)?;
        if let Ok(metadata) = tokio::fs::metadata(&full_path).await {
            if !metadata.is_dir() {
                return Err(anyhow!("Path exists and is not a directory: {}", path));
            }
            return Ok(true);
        }
        tokio::fs::create_dir_all(full_path).await?;
        Ok(true)
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<bool> {
        let src_full = self.to_local_path(src)?;
        let dst_full = self.to_local_path(dst)?;

        if tokio::fs::try_exists(&dst_full).await? {
            tracing::debug!("Rename target already exists: {}", dst);
            return Ok(false);
        }

        // Ensure target directory exists / 确保目标目录存在
        if let Some(parent) = dst_full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::rename(src_full, dst_full).await?;
        Ok(true)
    }
}
