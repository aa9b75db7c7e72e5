use libloading::Library;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{FileIOFactory, PluginDeclaration, PluginRegistrar, PLUGIN_SYMBOL};
use crate::error::FsError;
use crate::storage::FileIO;

type LoaderCell = Arc<OnceCell<Arc<PluginLoader>>>;

// 全局插件加载器注册表 (module dir -> loader)
static LOADERS: Lazy<Mutex<HashMap<PathBuf, LoaderCell>>> = Lazy::new(|| Mutex::new(HashMap::new()));

// Statically linked factories, keyed by module dir / 静态链接的工厂
static BUILTINS: Lazy<RwLock<HashMap<PathBuf, Vec<Arc<dyn FileIOFactory>>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static CONSTRUCTIONS: Lazy<Mutex<HashMap<PathBuf, usize>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Collects factories during loader construction / 构建期注册器
#[derive(Default)]
struct Registrar {
    factories: HashMap<String, Arc<dyn FileIOFactory>>,
}

impl PluginRegistrar for Registrar {
    fn register_factory(&mut self, factory: Arc<dyn FileIOFactory>) {
        let id = factory.implementation_id().to_string();
        if self.factories.insert(id.clone(), factory).is_some() {
            tracing::warn!("Duplicate FileIO implementation replaced: {}", id);
        }
    }
}

/// Reject plugins built by another compiler or core version / 校验插件构建版本
pub fn check_declaration(declaration: &PluginDeclaration) -> Result<(), String> {
    if declaration.rustc_version != crate::RUSTC_VERSION
        || declaration.core_version != crate::CORE_VERSION
    {
        return Err(format!(
            "incompatible build: plugin ({}, core {}) vs host ({}, core {})",
            declaration.rustc_version,
            declaration.core_version,
            crate::RUSTC_VERSION,
            crate::CORE_VERSION
        ));
    }
    Ok(())
}

/// Plugin loader for one module directory / 插件加载器
///
/// One instance per directory per process, built on first access and never
/// torn down. Immutable after construction.
pub struct PluginLoader {
    module_dir: PathBuf,
    // factories hold vtables inside the libraries: keep them declared (and dropped) first
    factories: HashMap<String, Arc<dyn FileIOFactory>>,
    _libraries: Vec<Library>,
}

impl PluginLoader {
    /// Get (or build once) the loader for a module directory / 获取插件加载器
    ///
    /// Concurrent first callers block until the single construction finishes.
    /// A failed construction is not cached; the next call tries again.
    pub fn get(module_dir: impl AsRef<Path>) -> Result<Arc<PluginLoader>, FsError> {
        let key = module_dir.as_ref().to_path_buf();
        // 只在查找cell时持有全局锁，构建过程不阻塞其他目录
        let cell = LOADERS.lock().entry(key.clone()).or_default().clone();
        cell.get_or_try_init(|| Self::open(&key).map(Arc::new)).cloned()
    }

    /// Register a statically linked factory for a module directory / 注册静态链接的实现
    ///
    /// Must happen before the first `get` for that directory.
    pub fn register_builtin(module_dir: impl AsRef<Path>, factory: Arc<dyn FileIOFactory>) {
        let key = module_dir.as_ref().to_path_buf();
        let already_built = LOADERS
            .lock()
            .get(&key)
            .map(|cell| cell.get().is_some())
            .unwrap_or(false);
        if already_built {
            tracing::warn!(
                "Loader for {:?} already built, builtin {} will not be visible",
                key,
                factory.implementation_id()
            );
        }
        BUILTINS.write().entry(key).or_default().push(factory);
    }

    /// How many times a loader construction ran for a directory / 构建次数
    pub fn construction_count(module_dir: impl AsRef<Path>) -> usize {
        CONSTRUCTIONS
            .lock()
            .get(module_dir.as_ref())
            .copied()
            .unwrap_or(0)
    }

    fn open(module_dir: &Path) -> Result<PluginLoader, FsError> {
        *CONSTRUCTIONS.lock().entry(module_dir.to_path_buf()).or_insert(0) += 1;
        let module = module_dir.display().to_string();

        if !module_dir.is_dir() {
            return Err(FsError::plugin_not_available(&module, "module directory not found"));
        }

        let mut registrar = Registrar::default();
        if let Some(builtins) = BUILTINS.read().get(module_dir) {
            for factory in builtins {
                registrar.register_factory(factory.clone());
            }
        }

        let mut libraries = Vec::new();
        for path in Self::library_files(module_dir)? {
            let library = Self::load_library(&path, &mut registrar)
                .map_err(|reason| FsError::plugin_not_available(&module, reason))?;
            libraries.push(library);
        }

        tracing::info!(
            "Plugin loader initialized: {} ({} libraries, implementations: {:?})",
            module,
            libraries.len(),
            registrar.factories.keys().collect::<Vec<_>>()
        );

        Ok(PluginLoader {
            module_dir: module_dir.to_path_buf(),
            factories: registrar.factories,
            _libraries: libraries,
        })
    }

    /// Shared libraries directly inside the module dir, sorted / 目录下的动态库
    fn library_files(module_dir: &Path) -> Result<Vec<PathBuf>, FsError> {
        let entries = std::fs::read_dir(module_dir).map_err(|e| {
            FsError::plugin_not_available(module_dir.display().to_string(), e.to_string())
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext == std::env::consts::DLL_EXTENSION)
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn load_library(path: &Path, registrar: &mut Registrar) -> Result<Library, String> {
        // SAFETY: loading runs the library's initializers; plugin directories are trusted
        let library = unsafe { Library::new(path) }
            .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;

        let declaration: PluginDeclaration = unsafe {
            let symbol = library
                .get::<*mut PluginDeclaration>(PLUGIN_SYMBOL)
                .map_err(|e| format!("{} is not a plugin: {}", path.display(), e))?;
            (*symbol).read()
        };

        check_declaration(&declaration)
            .map_err(|reason| format!("{}: {}", path.display(), reason))?;

        (declaration.register)(registrar);
        tracing::debug!("Plugin library loaded: {}", path.display());
        Ok(library)
    }

    /// Create a new instance of an implementation / 创建实现实例
    pub fn new_instance(&self, implementation_id: &str) -> Result<Box<dyn FileIO>, FsError> {
        let module = self.module_dir.display().to_string();
        let factory = self.factories.get(implementation_id).ok_or_else(|| {
            FsError::plugin_not_available(&module, format!("implementation not found: {}", implementation_id))
        })?;

        factory.create().map_err(|e| {
            FsError::plugin_not_available(&module, format!("cannot instantiate {}: {}", implementation_id, e))
        })
    }

    pub fn module_directory(&self) -> &Path {
        &self.module_dir
    }

    pub fn implementation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}
