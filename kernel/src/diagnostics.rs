// Diagnostics
//
// Warnings raised while compensating or reconciling. They are handed
// back to the caller, which decides how to surface them to the user.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub message: String,
}

/// Caller-owned warning channel.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "ddl warning");
        self.warnings.push(Warning { message });
    }

    /// Report an error returned by a backend collaborator.
    pub fn push_error_warning(&mut self, err: &dyn std::error::Error) {
        self.push_warning(format!("Got error '{err}' from backend"));
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.warnings.iter().any(|w| w.message.contains(needle))
    }

    pub fn take(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }
}
