pub mod config;
pub mod credentials;
pub mod error;
pub mod options;
pub mod plugin;
pub mod storage;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

pub use error::FsError;
pub use options::Options;
pub use storage::{FileIO, FileIORegistry, FileIOLoader};

/// Core crate version, plugins must match it / 核心库版本
pub static CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compiler that built this crate, plugins must match it / 编译器版本
pub static RUSTC_VERSION: &str = env!("RUSTC_VERSION");

/// Build time / 构建时间
pub static BUILD_TIME: &str = env!("BUILD_TIME");

// Register all scheme loaders (call unified registration function from drivers module) / 注册所有加载器
pub async fn register_loaders(registry: &FileIORegistry) -> anyhow::Result<()> {
    drivers::register_all(registry).await
}
