use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of one provisioning run. Runs only move forward, one stage at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStage {
    NotStarted,
    EnvironmentEnsured,
    SystemDepsInstalled,
    LanguageDepsInstalled,
    Cleaned,
    Done,
}

impl ProvisionStage {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::EnvironmentEnsured),
            Self::EnvironmentEnsured => Some(Self::SystemDepsInstalled),
            Self::SystemDepsInstalled => Some(Self::LanguageDepsInstalled),
            Self::LanguageDepsInstalled => Some(Self::Cleaned),
            Self::Cleaned => Some(Self::Done),
            Self::Done => None,
        }
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not-started",
            Self::EnvironmentEnsured => "environment-ensured",
            Self::SystemDepsInstalled => "system-deps-installed",
            Self::LanguageDepsInstalled => "language-deps-installed",
            Self::Cleaned => "cleaned",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// One of the four provisioning operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    EnsureEnvironment,
    InstallSystem,
    InstallLanguage,
    Cleanup,
}

impl Step {
    /// Stage reached when this step completes.
    pub fn completes(self) -> ProvisionStage {
        match self {
            Self::EnsureEnvironment => ProvisionStage::EnvironmentEnsured,
            Self::InstallSystem => ProvisionStage::SystemDepsInstalled,
            Self::InstallLanguage => ProvisionStage::LanguageDepsInstalled,
            Self::Cleanup => ProvisionStage::Cleaned,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EnsureEnvironment => "ensure environment",
            Self::InstallSystem => "install system dependencies",
            Self::InstallLanguage => "install language dependencies",
            Self::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: ProvisionStage, to: ProvisionStage) -> Result<(), CoreError> {
    if from.next() == Some(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
