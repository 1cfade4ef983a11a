use crate::provisioner::EnsureOutcome;
use crate::stage::ProvisionStage;
use provenv_schema::{DependencySource, DescriptorFingerprint};
use serde::Serialize;
use std::fmt;

/// Advisory result of a failed cache prune. Never fails a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupWarning {
    pub message: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cleanup failed: {}", self.message)
    }
}

/// Summary of a completed provisioning run.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub env_name: String,
    pub runtime_version: String,
    pub backend: String,
    pub fingerprint: DescriptorFingerprint,
    pub environment: EnsureOutcome,
    pub system_packages: Vec<String>,
    pub language_source: DependencySource,
    pub cleanup_warning: Option<CleanupWarning>,
    pub stage: ProvisionStage,
    pub started_at: String,
    pub finished_at: String,
}

impl ProvisionReport {
    /// True when every primary step completed. A cleanup warning does not
    /// change this.
    pub fn succeeded(&self) -> bool {
        self.stage == ProvisionStage::Done
    }
}
