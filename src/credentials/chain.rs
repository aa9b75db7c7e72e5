use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use super::{
    CredentialProvider, CredentialResolver, Credentials, EnvironmentProvider,
    InstanceMetadataProvider, ProfileProvider,
};
use crate::config::FileIOConfig;

/// Ordered probe chain, first success wins / 凭证探测链
///
/// Each probe is bounded by `probe_timeout`. When every live probe misses,
/// the last credentials this chain produced are returned.
pub struct CredentialChain {
    providers: Vec<Box<dyn CredentialProvider>>,
    probe_timeout: Duration,
    last_resolved: Mutex<Option<Credentials>>,
}

impl CredentialChain {
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>, probe_timeout: Duration) -> Self {
        Self {
            providers,
            probe_timeout,
            last_resolved: Mutex::new(None),
        }
    }

    /// Default chain: env, profile file, metadata services / 默认探测链
    pub fn from_config(config: &FileIOConfig) -> Self {
        let mut providers: Vec<Box<dyn CredentialProvider>> = vec![
            Box::new(EnvironmentProvider::new()),
            Box::new(ProfileProvider::from_env()),
        ];
        if config.credentials.instance_metadata {
            providers.push(Box::new(InstanceMetadataProvider::new(
                &config.credentials.metadata_endpoint,
                config.get_probe_timeout(),
            )));
        }
        Self::new(providers, config.get_probe_timeout())
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl CredentialResolver for CredentialChain {
    async fn resolve(&self) -> Option<Credentials> {
        for provider in &self.providers {
            match tokio::time::timeout(self.probe_timeout, provider.probe()).await {
                Ok(Ok(Some(credentials))) if credentials.is_complete() => {
                    tracing::debug!("Credentials found by {} provider", provider.name());
                    *self.last_resolved.lock() = Some(credentials.clone());
                    return Some(credentials);
                }
                Ok(Ok(_)) => {
                    tracing::debug!("No credentials from {} provider", provider.name());
                }
                Ok(Err(e)) => {
                    tracing::debug!("Credential provider {} failed: {}", provider.name(), e);
                }
                Err(_) => {
                    tracing::debug!(
                        "Credential provider {} timed out after {:?}",
                        provider.name(),
                        self.probe_timeout
                    );
                }
            }
        }

        let cached = self.last_resolved.lock().clone();
        if cached.is_some() {
            tracing::debug!("Using previously resolved credentials");
        }
        cached
    }
}
