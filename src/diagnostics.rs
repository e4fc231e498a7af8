// ABOUTME: Diagnostics accumulator for non-fatal warnings during a deployment run.
// ABOUTME: Collects problems that must not change a stage's status but should be reported.

use crate::types::StageId;

/// Collects non-fatal warnings during one deployment run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        match &warning.stage {
            Some(stage) => tracing::warn!(stage = %stage, kind = ?warning.kind, "{}", warning.message),
            None => tracing::warn!(kind = ?warning.kind, "{}", warning.message),
        }
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        for w in warnings {
            self.warn(w);
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

/// A non-fatal warning collected during a deployment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub stage: Option<StageId>,
    pub message: String,
}

impl Warning {
    /// Stage logs could not be flushed to the log store.
    pub fn log_flush(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::LogFlush,
            stage: Some(stage),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    LogFlush,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings() {
        let mut diag = Diagnostics::default();
        diag.warn(Warning::log_flush(StageId::new("s"), "log store unavailable"));
        diag.extend([Warning::log_flush(StageId::new("t"), "timed out")]);

        assert!(diag.has_warnings());
        let kinds: Vec<_> = diag.warnings().iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WarningKind::LogFlush, WarningKind::LogFlush]);
        assert_eq!(diag.warnings()[0].stage, Some(StageId::new("s")));
        assert_eq!(diag.into_warnings()[1].message, "timed out");
    }
}
