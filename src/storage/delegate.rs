//! Lazily initialized plugin FileIO / 延迟初始化的插件文件系统
//!
//! `PluginFileIO` is handed out by scheme loaders. Nothing is loaded until the
//! first capability call; that call loads the implementation from its plugin
//! directory, injects ambient credentials into the shared options, configures
//! the instance and keeps it. Every later call is forwarded to that instance.
//! A failed initialization is stored and returned to every later caller.

use async_trait::async_trait;
use anyhow::Result;
use std::ops::Range;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::OnceCell;

use super::{Entry, FileIO, FileIOBox};
use crate::config;
use crate::credentials::CredentialResolver;
use crate::error::FsError;
use crate::options::Options;
use crate::plugin::PluginLoader;

/// Static description of one plugin-backed scheme / 插件描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub scheme: String,
    pub implementation_id: String,
    /// Relative to the configured plugin dir, or absolute / 插件目录
    pub module_directory: String,
    pub object_store: bool,
}

/// Option keys receiving discovered credentials / 凭证注入的配置键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialKeys {
    pub access_key: String,
    pub secret_key: String,
}

/// Observable initialization state / 初始化状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Ready,
    Failed(FsError),
}

pub struct PluginFileIO {
    inner: Arc<Shared>,
}

/// State shared with the initialization task / 与初始化任务共享的状态
struct Shared {
    descriptor: PluginDescriptor,
    credential_keys: Option<CredentialKeys>,
    options: Options,
    resolver: Arc<dyn CredentialResolver>,
    handle: OnceCell<Result<FileIOBox, FsError>>,
}

impl PluginFileIO {
    pub fn new(
        descriptor: PluginDescriptor,
        options: Options,
        resolver: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                descriptor,
                credential_keys: None,
                options,
                resolver,
                handle: OnceCell::new(),
            }),
        }
    }

    /// Inject discovered credentials under these keys / 设置凭证注入键
    pub fn with_credential_keys(mut self, keys: CredentialKeys) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.credential_keys = Some(keys);
        }
        self
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.inner.descriptor
    }

    pub fn state(&self) -> InitState {
        match self.inner.handle.get() {
            None => InitState::Uninitialized,
            Some(Ok(_)) => InitState::Ready,
            Some(Err(e)) => InitState::Failed(e.clone()),
        }
    }

    /// Ready handle, initializing on first use / 获取实际文件系统
    ///
    /// Initialization runs in its own task: a caller that gives up waiting
    /// does not abort it, and later callers wait for the same outcome.
    pub async fn delegate(&self) -> Result<&FileIOBox, FsError> {
        if self.inner.handle.get().is_none() {
            let shared = self.inner.clone();
            let task = tokio::spawn(async move {
                shared.handle.get_or_init(|| shared.initialize()).await;
            });
            if let Err(e) = task.await {
                // panicked before storing an outcome, the next call starts over
                return Err(FsError::initialization(self.inner.descriptor.scheme.as_str(), e.to_string()));
            }
        }

        match self.inner.handle.get() {
            Some(outcome) => outcome.as_ref().map_err(Clone::clone),
            None => Err(FsError::initialization(
                self.inner.descriptor.scheme.as_str(),
                "initialization did not complete",
            )),
        }
    }

    async fn fileio(&self) -> Result<&FileIOBox> {
        Ok(self.delegate().await?)
    }
}

impl Shared {
    async fn initialize(&self) -> Result<FileIOBox, FsError> {
        let scheme = &self.descriptor.scheme;
        let module_dir = config::config().get_module_dir(&self.descriptor.module_directory);
        tracing::debug!("Initializing {} FileIO from {:?}", scheme, module_dir);

        let mut fileio = PluginLoader::get(&module_dir)
            .and_then(|loader| loader.new_instance(&self.descriptor.implementation_id))
            .map_err(|e| {
                tracing::error!("{} FileIO unavailable: {}", scheme, e);
                e
            })?;

        if let Some(keys) = &self.credential_keys {
            // 发现的凭证总是覆盖调用方显式设置的值
            if let Some(credentials) = self.resolver.resolve().await {
                tracing::debug!("Injecting ambient credentials into {} options", scheme);
                self.options.set(keys.access_key.as_str(), credentials.access_key);
                self.options.set(keys.secret_key.as_str(), credentials.secret_key);
            }
        }

        // the plugin links its own lock implementation: give it a map no host thread touches
        let snapshot = Options::from_map(self.options.snapshot());
        fileio.configure(&snapshot).await.map_err(|e| {
            tracing::error!("{} FileIO configure failed: {}", scheme, e);
            FsError::initialization(scheme.as_str(), e.to_string())
        })?;

        tracing::info!("{} FileIO ready ({})", scheme, self.descriptor.implementation_id);
        Ok(Arc::from(fileio))
    }
}

#[async_trait]
impl FileIO for PluginFileIO {
    fn is_object_store(&self) -> bool {
        self.inner.descriptor.object_store
    }

    async fn open_reader(
        &self,
        path: &str,
        range: Option<Range<u64>>,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        self.fileio().await?.open_reader(path, range).await
    }

    async fn open_writer(
        &self,
        path: &str,
        overwrite: bool,
    ) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
        self.fileio().await?.open_writer(path, overwrite).await
    }

    async fn get_status(&self, path: &str) -> Result<Entry> {
        self.fileio().await?.get_status(path).await
    }

    async fn list(&self, path: &str) -> Result<Vec<Entry>> {
        self.fileio().await?.list(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.fileio().await?.exists(path).await
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<bool> {
        self.fileio().await?.delete(path, recursive).await
    }

    async fn create_dir(&self, path: &str) -> Result<bool> {
        self.fileio().await?.create_dir(path).await
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<bool> {
        self.fileio().await?.rename(src, dst).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, StaticResolver};
    use crate::drivers::local::LocalFileIO;
    use crate::plugin::FileIOFactory;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const IMPL_ID: &str = "test.RecordingFileIO";

    #[derive(Default)]
    struct Recorder {
        created: AtomicUsize,
        configured: AtomicUsize,
        seen_options: Mutex<Option<HashMap<String, String>>>,
        received: Mutex<Option<Options>>,
    }

    /// Local FileIO that records what configure() saw
    struct RecordingFileIO {
        recorder: Arc<Recorder>,
        fail_configure: bool,
        configure_delay: Duration,
        inner: LocalFileIO,
    }

    #[async_trait]
    impl FileIO for RecordingFileIO {
        fn is_object_store(&self) -> bool {
            true
        }

        async fn configure(&mut self, options: &Options) -> Result<()> {
            self.recorder.configured.fetch_add(1, Ordering::SeqCst);
            *self.recorder.seen_options.lock() = Some(options.snapshot());
            *self.recorder.received.lock() = Some(options.clone());
            tokio::time::sleep(self.configure_delay).await;
            if self.fail_configure {
                return Err(anyhow!("endpoint unreachable"));
            }
            Ok(())
        }

        async fn open_reader(&self, path: &str, range: Option<Range<u64>>) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
            self.inner.open_reader(path, range).await
        }

        async fn open_writer(&self, path: &str, overwrite: bool) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
            self.inner.open_writer(path, overwrite).await
        }

        async fn get_status(&self, path: &str) -> Result<Entry> {
            self.inner.get_status(path).await
        }

        async fn list(&self, path: &str) -> Result<Vec<Entry>> {
            self.inner.list(path).await
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }

        async fn delete(&self, path: &str, recursive: bool) -> Result<bool> {
            self.inner.delete(path, recursive).await
        }

        async fn create_dir(&self, path: &str) -> Result<bool> {
            self.inner.create_dir(path).await
        }

        async fn rename(&self, src: &str, dst: &str) -> Result<bool> {
            self.inner.rename(src, dst).await
        }
    }

    struct RecordingFactory {
        recorder: Arc<Recorder>,
        fail_configure: bool,
        configure_delay: Duration,
    }

    impl FileIOFactory for RecordingFactory {
        fn implementation_id(&self) -> &str {
            IMPL_ID
        }

        fn create(&self) -> anyhow::Result<Box<dyn FileIO>> {
            self.recorder.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingFileIO {
                recorder: self.recorder.clone(),
                fail_configure: self.fail_configure,
                configure_delay: self.configure_delay,
                inner: LocalFileIO::new(),
            }))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        recorder: Arc<Recorder>,
    }

    impl Fixture {
        fn new(fail_configure: bool) -> Self {
            Self::with_delay(fail_configure, Duration::ZERO)
        }

        fn with_delay(fail_configure: bool, configure_delay: Duration) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let recorder = Arc::new(Recorder::default());
            PluginLoader::register_builtin(
                dir.path(),
                Arc::new(RecordingFactory { recorder: recorder.clone(), fail_configure, configure_delay }),
            );
            Self { dir, recorder }
        }

        fn descriptor(&self, implementation_id: &str) -> PluginDescriptor {
            PluginDescriptor {
                scheme: "s3".to_string(),
                implementation_id: implementation_id.to_string(),
                module_directory: self.dir.path().to_string_lossy().to_string(),
                object_store: true,
            }
        }

        fn fileio(&self, options: Options, ambient: Option<Credentials>) -> PluginFileIO {
            PluginFileIO::new(self.descriptor(IMPL_ID), options, Arc::new(StaticResolver::new(ambient)))
                .with_credential_keys(CredentialKeys {
                    access_key: "s3.access-key".to_string(),
                    secret_key: "s3.secret-key".to_string(),
                })
        }

        fn path(&self) -> String {
            self.dir.path().to_string_lossy().to_string()
        }

        fn seen(&self, key: &str) -> Option<String> {
            self.recorder.seen_options.lock().as_ref().and_then(|m| m.get(key).cloned())
        }
    }

    #[tokio::test]
    async fn test_explicit_credentials_pass_through() {
        let fx = Fixture::new(false);
        let options: Options = [("s3.access-key", "AK1"), ("s3.secret-key", "SK1")].into_iter().collect();
        let fileio = fx.fileio(options, None);

        assert!(fileio.exists(&fx.path()).await.unwrap());
        assert_eq!(fx.seen("s3.access-key").as_deref(), Some("AK1"));
        assert_eq!(fx.seen("s3.secret-key").as_deref(), Some("SK1"));
    }

    #[tokio::test]
    async fn test_ambient_credentials_injected() {
        let fx = Fixture::new(false);
        let options: Options = [("s3.endpoint", "http://minio:9000")].into_iter().collect();
        let fileio = fx.fileio(options.clone(), Some(Credentials::new("ENV_AK", "ENV_SK")));

        fileio.list(&fx.path()).await.unwrap();
        assert_eq!(fx.seen("s3.access-key").as_deref(), Some("ENV_AK"));
        assert_eq!(fx.seen("s3.secret-key").as_deref(), Some("ENV_SK"));
        assert_eq!(fx.seen("s3.endpoint").as_deref(), Some("http://minio:9000"));
        // caller's map was mutated in place
        assert_eq!(options.get("s3.access-key").as_deref(), Some("ENV_AK"));
    }

    #[tokio::test]
    async fn test_ambient_credentials_overwrite_explicit_ones() {
        let fx = Fixture::new(false);
        let options: Options = [("s3.access-key", "AK1"), ("s3.secret-key", "SK1")].into_iter().collect();
        let fileio = fx.fileio(options.clone(), Some(Credentials::new("ENV_AK", "ENV_SK")));

        fileio.exists(&fx.path()).await.unwrap();
        assert_eq!(fx.seen("s3.access-key").as_deref(), Some("ENV_AK"));
        assert_eq!(fx.seen("s3.secret-key").as_deref(), Some("ENV_SK"));
        assert_eq!(options.get("s3.secret-key").as_deref(), Some("ENV_SK"));
    }

    #[tokio::test]
    async fn test_no_injection_without_credential_keys() {
        let fx = Fixture::new(false);
        let fileio = PluginFileIO::new(
            fx.descriptor(IMPL_ID),
            Options::new(),
            Arc::new(StaticResolver::new(Some(Credentials::new("ENV_AK", "ENV_SK")))),
        );
        fileio.exists(&fx.path()).await.unwrap();
        assert_eq!(fx.seen("s3.access-key"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_initializes_once() {
        let fx = Fixture::new(false);
        let fileio = Arc::new(fx.fileio(Options::new(), None));
        assert_eq!(fileio.state(), InitState::Uninitialized);

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let fileio = fileio.clone();
                let path = fx.path();
                tokio::spawn(async move { fileio.exists(&path).await.unwrap() })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            assert!(result.unwrap());
        }

        fileio.list(&fx.path()).await.unwrap();
        fileio.get_status(&fx.path()).await.unwrap();

        assert_eq!(fx.recorder.created.load(Ordering::SeqCst), 1);
        assert_eq!(fx.recorder.configured.load(Ordering::SeqCst), 1);
        assert_eq!(fileio.state(), InitState::Ready);
    }

    #[tokio::test]
    async fn test_missing_implementation_is_terminal() {
        let fx = Fixture::new(false);
        let fileio = PluginFileIO::new(fx.descriptor("test.Missing"), Options::new(), Arc::new(StaticResolver::empty()));
        assert!(fileio.is_object_store());

        let first = fileio.exists(&fx.path()).await.unwrap_err();
        let first = first.downcast_ref::<FsError>().cloned().unwrap();
        assert!(matches!(first, FsError::PluginNotAvailable { .. }));

        for _ in 0..3 {
            let again = fileio.list(&fx.path()).await.unwrap_err();
            assert_eq!(again.downcast_ref::<FsError>(), Some(&first));
        }
        assert_eq!(fileio.state(), InitState::Failed(first));
        assert!(fileio.is_object_store());
        assert_eq!(fx.recorder.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_plugin_directory() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = PluginDescriptor {
            scheme: "s3".to_string(),
            implementation_id: IMPL_ID.to_string(),
            module_directory: dir.path().join("absent").to_string_lossy().to_string(),
            object_store: true,
        };
        let fileio = PluginFileIO::new(descriptor, Options::new(), Arc::new(StaticResolver::empty()));

        let err = fileio.delegate().await.err().unwrap();
        assert!(matches!(err, FsError::PluginNotAvailable { .. }));
    }

    #[tokio::test]
    async fn test_configure_failure_is_terminal() {
        let fx = Fixture::new(true);
        let fileio = fx.fileio(Options::new(), None);
        assert!(fileio.is_object_store());

        let err = fileio.exists(&fx.path()).await.unwrap_err();
        let err = err.downcast_ref::<FsError>().cloned().unwrap();
        assert_eq!(err, FsError::initialization("s3", "endpoint unreachable"));

        let again = fileio.create_dir(&fx.path()).await.unwrap_err();
        assert_eq!(again.downcast_ref::<FsError>(), Some(&err));

        assert_eq!(fx.recorder.created.load(Ordering::SeqCst), 1);
        assert_eq!(fx.recorder.configured.load(Ordering::SeqCst), 1);
        assert!(matches!(fileio.state(), InitState::Failed(FsError::FilesystemInitialization { .. })));
        assert!(fileio.is_object_store());
    }

    #[tokio::test]
    async fn test_object_store_flag_before_and_after_init() {
        let fx = Fixture::new(false);
        let fileio = fx.fileio(Options::new(), None);
        assert!(fileio.is_object_store());
        fileio.exists(&fx.path()).await.unwrap();
        assert!(fileio.is_object_store());
    }

    #[tokio::test]
    async fn test_abandoned_first_call_does_not_restart_initialization() {
        let fx = Fixture::with_delay(false, Duration::from_millis(200));
        let options: Options = [("s3.access-key", "AK1"), ("s3.secret-key", "SK1")].into_iter().collect();
        let fileio = fx.fileio(options, Some(Credentials::new("ENV_AK", "ENV_SK")));

        // first caller gives up while configure() is still running
        let gave_up = tokio::time::timeout(Duration::from_millis(50), fileio.exists(&fx.path())).await;
        assert!(gave_up.is_err());

        assert!(fileio.exists(&fx.path()).await.unwrap());
        assert_eq!(fx.recorder.created.load(Ordering::SeqCst), 1);
        assert_eq!(fx.recorder.configured.load(Ordering::SeqCst), 1);
        assert_eq!(fx.seen("s3.access-key").as_deref(), Some("ENV_AK"));
        assert_eq!(fileio.state(), InitState::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_share_configure_failure() {
        let fx = Fixture::with_delay(true, Duration::from_millis(20));
        let fileio = Arc::new(fx.fileio(Options::new(), None));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let fileio = fileio.clone();
                let path = fx.path();
                tokio::spawn(async move {
                    let err = fileio.exists(&path).await.unwrap_err();
                    err.downcast_ref::<FsError>().cloned().unwrap()
                })
            })
            .collect();

        let expected = FsError::initialization("s3", "endpoint unreachable");
        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap(), expected);
        }
        assert_eq!(fx.recorder.created.load(Ordering::SeqCst), 1);
        assert_eq!(fx.recorder.configured.load(Ordering::SeqCst), 1);
        assert_eq!(fileio.state(), InitState::Failed(expected));
    }

    #[tokio::test]
    async fn test_configure_gets_private_copy_of_options() {
        let fx = Fixture::new(false);
        let options: Options = [("s3.region", "us-west-2")].into_iter().collect();
        let fileio = fx.fileio(options.clone(), Some(Credentials::new("ENV_AK", "ENV_SK")));
        fileio.exists(&fx.path()).await.unwrap();

        let received = fx.recorder.received.lock().clone().unwrap();
        assert_eq!(received.get("s3.access-key").as_deref(), Some("ENV_AK"));
        assert_eq!(received.get("s3.region").as_deref(), Some("us-west-2"));

        // later host-side writes never reach the instance's copy
        options.set("s3.region", "eu-central-1");
        assert_eq!(received.get("s3.region").as_deref(), Some("us-west-2"));
    }
}
