use async_trait::async_trait;

use super::{FileIO, FileIOLoader, RequiredOption};
use crate::drivers::local;
use crate::error::FsError;
use crate::options::Options;

/// Built-in loader for local paths, no plugin involved / 本地文件系统加载器
pub struct LocalFileIOLoader;

#[async_trait]
impl FileIOLoader for LocalFileIOLoader {
    fn scheme(&self) -> &'static str {
        "file"
    }

    async fn required_options(&self) -> Vec<RequiredOption> {
        Vec::new()
    }

    fn load(&self, path: &str, _options: Options) -> Result<Box<dyn FileIO>, FsError> {
        tracing::debug!("Local FileIO created for {}", path);
        Ok(Box::new(local::LocalFileIO::new()))
    }
}
