// ABOUTME: Maps stage kinds to executor factories, plus one rollback factory per app kind.
// ABOUTME: Built once at startup and read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::{Executor, Factory, Input};
use crate::model::{ApplicationKind, StageKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("executor for stage {0} is already registered")]
    AlreadyRegistered(StageKind),

    #[error("rollback executor for {0} applications is already registered")]
    RollbackAlreadyRegistered(ApplicationKind),

    #[error("no executor registered for stage {0}")]
    NotRegistered(StageKind),

    #[error("no rollback executor registered for {0} applications")]
    RollbackNotRegistered(ApplicationKind),
}

#[derive(Default)]
pub struct Registry {
    factories: HashMap<StageKind, Factory>,
    rollbacks: HashMap<ApplicationKind, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: StageKind, factory: Factory) -> Result<(), RegistryError> {
        if self.factories.contains_key(&stage) {
            return Err(RegistryError::AlreadyRegistered(stage));
        }
        self.factories.insert(stage, factory);
        Ok(())
    }

    pub fn register_rollback(
        &mut self,
        kind: ApplicationKind,
        factory: Factory,
    ) -> Result<(), RegistryError> {
        if self.rollbacks.contains_key(&kind) {
            return Err(RegistryError::RollbackAlreadyRegistered(kind));
        }
        self.rollbacks.insert(kind, factory);
        Ok(())
    }

    /// Build a fresh executor for the stage described by `input`. Rollback
    /// stages resolve through the deployment's application kind.
    pub fn executor(&self, input: Input) -> Result<Box<dyn Executor>, RegistryError> {
        let stage = input.stage.name;
        if stage == StageKind::Rollback {
            let kind = input.deployment.kind;
            let factory = self
                .rollbacks
                .get(&kind)
                .ok_or(RegistryError::RollbackNotRegistered(kind))?;
            return Ok(factory(input));
        }
        let factory = self
            .factories
            .get(&stage)
            .ok_or(RegistryError::NotRegistered(stage))?;
        Ok(factory(input))
    }

    pub fn is_registered(&self, stage: StageKind) -> bool {
        self.factories.contains_key(&stage)
    }
}

/// Registry with every built-in executor.
pub fn default_registry() -> Result<Registry, RegistryError> {
    let mut r = Registry::new();
    super::wait::register(&mut r)?;
    super::waitapproval::register(&mut r)?;
    super::kubernetes::register(&mut r)?;
    super::lambda::register(&mut r)?;
    Ok(r)
}

pub(crate) fn factory<F, E>(f: F) -> Factory
where
    F: Fn(Input) -> E + Send + Sync + 'static,
    E: Executor + 'static,
{
    Arc::new(move |input| Box::new(f(input)) as Box<dyn Executor>)
}
