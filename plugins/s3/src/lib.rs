//! S3 FileIO plugin / S3插件
//!
//! Build with `cargo build -p yaolist-plugin-s3 --release` and copy the
//! resulting shared library into `<plugins.dir>/yaolist-plugin-s3/`.

use anyhow::Result;
use std::sync::Arc;

use yaolist_fileio::drivers::s3::S3_IMPLEMENTATION;
use yaolist_fileio::plugin::{FileIOFactory, PluginRegistrar};
use yaolist_fileio::FileIO;

pub mod config;
pub mod driver;
mod writer;

pub use config::S3Config;
pub use driver::S3FileIO;

/// S3 FileIO factory / S3实现工厂
pub struct S3FileIOFactory;

impl FileIOFactory for S3FileIOFactory {
    fn implementation_id(&self) -> &str {
        S3_IMPLEMENTATION
    }

    fn create(&self) -> Result<Box<dyn FileIO>> {
        Ok(Box::new(S3FileIO::new()))
    }
}

fn register(registrar: &mut dyn PluginRegistrar) {
    registrar.register_factory(Arc::new(S3FileIOFactory));
}

yaolist_fileio::export_plugin!(register);

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Vec<String>);

    impl PluginRegistrar for Collect {
        fn register_factory(&mut self, factory: Arc<dyn FileIOFactory>) {
            self.0.push(factory.implementation_id().to_string());
        }
    }

    #[test]
    fn test_declaration_registers_s3() {
        let mut collect = Collect(Vec::new());
        (plugin_declaration.register)(&mut collect);
        assert_eq!(collect.0, vec![S3_IMPLEMENTATION.to_string()]);
        assert_eq!(plugin_declaration.core_version, yaolist_fileio::CORE_VERSION);
        assert_eq!(plugin_declaration.rustc_version, yaolist_fileio::RUSTC_VERSION);
    }

    #[test]
    fn test_factory_creates_object_store() {
        let fileio = S3FileIOFactory.create().unwrap();
        assert!(fileio.is_object_store());
    }
}
