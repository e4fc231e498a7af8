// ABOUTME: In-process serverless platform that records functions, versions, and aliases.
// ABOUTME: Used by tests and local experiments; publish failures can be injected.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{FunctionManifest, LambdaClient, LambdaError, RoutingTrafficConfig};

#[derive(Debug, Clone, Default)]
struct FunctionState {
    manifest: Option<FunctionManifest>,
    versions: u32,
    traffic: Option<RoutingTrafficConfig>,
}

#[derive(Default)]
pub struct InMemoryLambdaClient {
    functions: Mutex<HashMap<String, FunctionState>>,
    publish_failures: Mutex<u32>,
}

impl InMemoryLambdaClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publish calls fail.
    pub fn fail_next_publishes(&self, n: u32) {
        *self.publish_failures.lock() = n;
    }

    pub fn traffic(&self, name: &str) -> Option<RoutingTrafficConfig> {
        self.functions
            .lock()
            .get(name)
            .and_then(|f| f.traffic.clone())
    }

    pub fn published_versions(&self, name: &str) -> u32 {
        self.functions.lock().get(name).map_or(0, |f| f.versions)
    }

    pub fn function(&self, name: &str) -> Option<FunctionManifest> {
        self.functions
            .lock()
            .get(name)
            .and_then(|f| f.manifest.clone())
    }
}

#[async_trait]
impl LambdaClient for InMemoryLambdaClient {
    async fn is_function_exist(&self, name: &str) -> Result<bool, LambdaError> {
        Ok(self
            .functions
            .lock()
            .get(name)
            .is_some_and(|f| f.manifest.is_some()))
    }

    async fn create_function(&self, fm: &FunctionManifest) -> Result<(), LambdaError> {
        let mut functions = self.functions.lock();
        let state = functions.entry(fm.spec.name.clone()).or_default();
        if state.manifest.is_some() {
            return Err(LambdaError::Api(format!(
                "function {} already exists",
                fm.spec.name
            )));
        }
        state.manifest = Some(fm.clone());
        Ok(())
    }

    async fn update_function(&self, fm: &FunctionManifest) -> Result<(), LambdaError> {
        let mut functions = self.functions.lock();
        let state = functions
            .get_mut(&fm.spec.name)
            .filter(|f| f.manifest.is_some())
            .ok_or(LambdaError::NotFound)?;
        state.manifest = Some(fm.clone());
        Ok(())
    }

    async fn publish_function(&self, fm: &FunctionManifest) -> Result<String, LambdaError> {
        {
            let mut failures = self.publish_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(LambdaError::Api("function update in progress".to_string()));
            }
        }
        let mut functions = self.functions.lock();
        let state = functions
            .get_mut(&fm.spec.name)
            .ok_or(LambdaError::NotFound)?;
        state.versions += 1;
        Ok(state.versions.to_string())
    }

    async fn get_traffic_config(
        &self,
        fm: &FunctionManifest,
    ) -> Result<RoutingTrafficConfig, LambdaError> {
        self.traffic(&fm.spec.name).ok_or(LambdaError::NotFound)
    }

    async fn create_traffic_config(
        &self,
        fm: &FunctionManifest,
        version: &str,
    ) -> Result<(), LambdaError> {
        let mut functions = self.functions.lock();
        let state = functions
            .get_mut(&fm.spec.name)
            .ok_or(LambdaError::NotFound)?;
        state.traffic = Some(RoutingTrafficConfig::single(version));
        Ok(())
    }

    async fn update_traffic_config(
        &self,
        fm: &FunctionManifest,
        config: &RoutingTrafficConfig,
    ) -> Result<(), LambdaError> {
        let mut functions = self.functions.lock();
        let state = functions
            .get_mut(&fm.spec.name)
            .filter(|f| f.traffic.is_some())
            .ok_or(LambdaError::NotFound)?;
        state.traffic = Some(config.clone());
        Ok(())
    }
}
