//! Loader configuration module / 加载器配置模块
//!
//! Manages configuration loaded from fileio.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<FileIOConfig>>> = OnceCell::new();

/// Loader configuration / 加载器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileIOConfig {
    /// Plugin configuration / 插件配置
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Credential discovery configuration / 凭证发现配置
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Plugin configuration / 插件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Root directory holding one sub-directory per plugin / 插件根目录
    pub dir: String,
}

/// Credential discovery configuration / 凭证发现配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Upper bound for a single discovery probe (milliseconds) / 单个探测超时
    pub probe_timeout_ms: u64,
    /// Query container/instance metadata services / 是否查询实例元数据服务
    pub instance_metadata: bool,
    /// EC2 metadata endpoint / EC2 元数据地址
    pub metadata_endpoint: String,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: "plugins".to_string(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1000,
            instance_metadata: true,
            metadata_endpoint: "http://169.254.169.254".to_string(),
        }
    }
}

impl FileIOConfig {
    /// Get the plugin root directory / 获取插件根目录
    pub fn get_plugins_dir(&self) -> PathBuf {
        PathBuf::from(&self.plugins.dir)
    }

    /// Resolve a plugin module directory; absolute paths are kept as-is / 解析插件目录
    pub fn get_module_dir(&self, module_directory: &str) -> PathBuf {
        let module = Path::new(module_directory);
        if module.is_absolute() {
            module.to_path_buf()
        } else {
            self.get_plugins_dir().join(module)
        }
    }

    /// Get probe timeout / 获取探测超时
    pub fn get_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.credentials.probe_timeout_ms)
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("fileio.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<FileIOConfig, String> {
    let config_path = get_config_path();

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: FileIOConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = FileIOConfig::default();
        save_config(&config)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &FileIOConfig) -> Result<(), String> {
    let config_path = get_config_path();

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(&config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config() -> Result<Arc<RwLock<FileIOConfig>>, String> {
    let config = load_config()?;

    let config_arc = Arc::new(RwLock::new(config));

    CONFIG
        .set(config_arc.clone())
        .map_err(|_| "Config already initialized".to_string())?;

    Ok(config_arc)
}

/// Get global configuration instance / 获取全局配置实例
///
/// Falls back to defaults without touching the disk when `init_config` was never called.
pub fn get_config() -> Arc<RwLock<FileIOConfig>> {
    CONFIG
        .get_or_init(|| Arc::new(RwLock::new(FileIOConfig::default())))
        .clone()
}

/// Get a read-only snapshot of current config / 获取当前配置的只读快照
pub fn config() -> FileIOConfig {
    get_config().read().clone()
}
