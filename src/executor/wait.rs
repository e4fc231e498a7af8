// ABOUTME: WAIT stage: sleeps for the configured duration unless stopped first.
// ABOUTME: The timer races the stop signal so cancellation is seen immediately.

use async_trait::async_trait;
use std::time::Duration;

use super::registry::{RegistryError, factory};
use super::{Executor, Input, Registry, StopSignal, StopSignalType};
use crate::model::{StageKind, StageStatus};

const DEFAULT_DURATION: Duration = Duration::from_secs(60);

pub struct WaitExecutor {
    input: Input,
}

pub fn register(r: &mut Registry) -> Result<(), RegistryError> {
    r.register(StageKind::Wait, factory(|input| WaitExecutor { input }))
}

#[async_trait]
impl Executor for WaitExecutor {
    async fn execute(&mut self, sig: StopSignal) -> StageStatus {
        let original = self.input.stage.status;
        let duration = self
            .input
            .stage_config
            .as_ref()
            .and_then(|c| c.wait_options())
            .map(|o| o.duration)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_DURATION);
        let lp = &self.input.log_persister;

        lp.append_info(&format!("Waiting for {duration:?}..."));
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            s = sig.stopped() => {
                return match s {
                    StopSignalType::Cancel => StageStatus::Cancelled,
                    StopSignalType::Terminate => original,
                    StopSignalType::None => StageStatus::Failure,
                };
            }
        }

        lp.append_info(&format!("Waited for {duration:?}"));
        StageStatus::Success
    }
}
