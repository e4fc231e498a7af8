// ABOUTME: Cooperative stop signals delivered to running stage executors.
// ABOUTME: Built on a watch channel so late subscribers still observe the signal.

use tokio::sync::watch;

use crate::model::StageStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignalType {
    None,
    /// An operator cancelled the deployment.
    Cancel,
    /// The process is shutting down; work should be resumable later.
    Terminate,
}

/// Receiving side handed to executors.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<StopSignalType>,
}

/// Sending side kept by the controller.
#[derive(Debug)]
pub struct StopSignalHandler {
    tx: watch::Sender<StopSignalType>,
}

pub fn new_stop_signal() -> (StopSignal, StopSignalHandler) {
    let (tx, rx) = watch::channel(StopSignalType::None);
    (StopSignal { rx }, StopSignalHandler { tx })
}

impl StopSignalHandler {
    /// Cancel unless a signal was already sent.
    pub fn cancel(&self) {
        self.tx.send_if_modified(|s| {
            if *s == StopSignalType::None {
                *s = StopSignalType::Cancel;
                true
            } else {
                false
            }
        });
    }

    /// Terminate. Overrides an earlier cancel since shutdown must not be
    /// mistaken for a finished stage.
    pub fn terminate(&self) {
        self.tx.send_if_modified(|s| {
            if *s == StopSignalType::Terminate {
                false
            } else {
                *s = StopSignalType::Terminate;
                true
            }
        });
    }

    pub fn signal(&self) -> StopSignalType {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl StopSignal {
    pub fn signal(&self) -> StopSignalType {
        *self.rx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.signal() != StopSignalType::None
    }

    /// Resolve with the first signal sent. Never resolves if the handler is
    /// dropped without signalling.
    pub async fn stopped(&self) -> StopSignalType {
        let mut rx = self.rx.clone();
        loop {
            let current = *rx.borrow_and_update();
            if current != StopSignalType::None {
                return current;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Resolve once a terminate signal is sent.
    pub async fn terminated(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() == StopSignalType::Terminate {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

/// Reconcile an executor's own result with any stop signal it received.
///
/// Cancel always yields CANCELLED, terminate restores the status the stage
/// had on entry so a later run picks it up again.
pub fn determine_stage_status(
    sig: StopSignalType,
    original: StageStatus,
    got: StageStatus,
) -> StageStatus {
    match sig {
        StopSignalType::None => got,
        StopSignalType::Cancel => StageStatus::Cancelled,
        StopSignalType::Terminate => original,
    }
}
