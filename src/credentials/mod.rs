//! Ambient credential discovery / 凭证发现
//!
//! ```text
//!  env vars ──> profile file ──> container/instance metadata ──> last result
//!      first probe that yields credentials wins, failures mean "not found"
//! ```

use async_trait::async_trait;
use anyhow::Result;
use std::fmt;

pub mod chain;
pub mod env;
pub mod profile;
pub mod metadata;

pub use chain::CredentialChain;
pub use env::EnvironmentProvider;
pub use profile::ProfileProvider;
pub use metadata::InstanceMetadataProvider;

/// Access/secret key pair / 访问凭证
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Both keys present and non-blank / 凭证是否完整
    pub fn is_complete(&self) -> bool {
        !self.access_key.trim().is_empty() && !self.secret_key.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// Resolves credentials, absence is not an error / 凭证解析器
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self) -> Option<Credentials>;
}

/// One discovery strategy of a chain / 单个凭证探测策略
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Provider name for logs / 名称
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the source has nothing / 探测凭证
    async fn probe(&self) -> Result<Option<Credentials>>;
}

/// Resolver with a fixed answer / 固定结果的解析器
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    credentials: Option<Credentials>,
}

impl StaticResolver {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }

    pub fn empty() -> Self {
        Self { credentials: None }
    }
}

#[async_trait]
impl CredentialResolver for StaticResolver {
    async fn resolve(&self) -> Option<Credentials> {
        self.credentials.clone()
    }
}
