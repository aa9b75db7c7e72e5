//! Plugin ABI / 插件接口
//!
//! A plugin is a `cdylib` placed in its own module directory. It exports a
//! [`PluginDeclaration`] through [`export_plugin!`](crate::export_plugin),
//! whose `register` function hands [`FileIOFactory`] instances to the host.
//! Trait objects cross the library boundary, so plugins must be built by the
//! same compiler against the same core crate version as the host.

use anyhow::Result;
use std::sync::Arc;

use crate::storage::FileIO;

pub mod loader;

pub use loader::PluginLoader;

/// Exported symbol name / 导出符号名
pub const PLUGIN_SYMBOL: &[u8] = b"plugin_declaration\0";

/// Constructs implementation instances inside a plugin / 实现工厂
pub trait FileIOFactory: Send + Sync {
    /// Logical implementation name, e.g. `yaolist.s3.S3FileIO` / 实现标识
    fn implementation_id(&self) -> &str;

    /// New unconfigured instance / 创建新实例
    fn create(&self) -> Result<Box<dyn FileIO>>;
}

/// Receives factories from a plugin's register function / 工厂注册器
pub trait PluginRegistrar {
    fn register_factory(&mut self, factory: Arc<dyn FileIOFactory>);
}

/// Static exported by every plugin library / 插件声明
#[derive(Copy, Clone)]
pub struct PluginDeclaration {
    pub rustc_version: &'static str,
    pub core_version: &'static str,
    pub register: fn(&mut dyn PluginRegistrar),
}

/// Export a plugin declaration from a plugin crate / 导出插件声明
///
/// ```ignore
/// fn register(registrar: &mut dyn PluginRegistrar) {
///     registrar.register_factory(Arc::new(MyFactory));
/// }
/// yaolist_fileio::export_plugin!(register);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($register:expr) => {
        #[doc(hidden)]
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static plugin_declaration: $crate::plugin::PluginDeclaration =
            $crate::plugin::PluginDeclaration {
                rustc_version: $crate::RUSTC_VERSION,
                core_version: $crate::CORE_VERSION,
                register: $register,
            };
    };
}
