// ABOUTME: Provider clients made available to stage executors.
// ABOUTME: Lambda clients are looked up by the cloud provider name an app configures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::provider::kubernetes::Applier;
use crate::provider::lambda::LambdaClient;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("no kubernetes applier is configured")]
    NoApplier,

    #[error("cloud provider {0:?} is not registered")]
    UnknownCloudProvider(String),
}

#[derive(Clone)]
pub struct ProviderClients {
    applier: Option<Arc<dyn Applier>>,
    lambda: HashMap<String, Arc<dyn LambdaClient>>,
    lambda_publish_retries: u32,
    lambda_publish_interval: Duration,
    apply_retries: u32,
    apply_backoff: Duration,
}

impl Default for ProviderClients {
    fn default() -> Self {
        Self {
            applier: None,
            lambda: HashMap::new(),
            lambda_publish_retries: 3,
            lambda_publish_interval: Duration::from_secs(60),
            apply_retries: 3,
            apply_backoff: Duration::from_secs(1),
        }
    }
}

impl ProviderClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_applier(mut self, applier: Arc<dyn Applier>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn with_lambda(mut self, name: impl Into<String>, client: Arc<dyn LambdaClient>) -> Self {
        self.lambda.insert(name.into(), client);
        self
    }

    /// How often and how far apart a failed Lambda version publish is retried.
    pub fn with_lambda_publish_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.lambda_publish_retries = attempts;
        self.lambda_publish_interval = interval;
        self
    }

    /// Attempts made to apply one manifest and the first backoff between
    /// them; later waits double.
    pub fn with_apply_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.apply_retries = attempts;
        self.apply_backoff = backoff;
        self
    }

    pub fn applier(&self) -> Result<Arc<dyn Applier>, ClientError> {
        self.applier.clone().ok_or(ClientError::NoApplier)
    }

    pub fn lambda(&self, name: &str) -> Result<Arc<dyn LambdaClient>, ClientError> {
        self.lambda
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::UnknownCloudProvider(name.to_string()))
    }

    pub(crate) fn lambda_publish_retry(&self) -> (u32, Duration) {
        (self.lambda_publish_retries, self.lambda_publish_interval)
    }

    pub(crate) fn apply_retry(&self) -> (u32, Duration) {
        (self.apply_retries.max(1), self.apply_backoff)
    }
}
