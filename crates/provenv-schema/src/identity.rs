use crate::normalize::EnvironmentDescriptor;
use crate::types::{Fingerprint, ShortFingerprint};
use serde::Serialize;

/// Content-derived identity of a provisioning plan.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DescriptorFingerprint {
    pub fingerprint: Fingerprint,
    pub short: ShortFingerprint,
}

/// Hash the canonical JSON of everything that changes what ends up in the
/// environment. Retry and cleanup settings only change how a run behaves.
pub fn compute_fingerprint(descriptor: &EnvironmentDescriptor) -> DescriptorFingerprint {
    let hex = blake3::hash(descriptor.canonical_json().as_bytes())
        .to_hex()
        .to_string();
    let short = hex[..12].to_owned();

    DescriptorFingerprint {
        fingerprint: Fingerprint::new(hex),
        short: ShortFingerprint::new(short),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{parse_descriptor_str, CleanupPolicy};

    #[test]
    fn fingerprint_is_stable_and_sized() {
        let d = EnvironmentDescriptor::default();
        let a = compute_fingerprint(&d);
        let b = compute_fingerprint(&d);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint.len(), 64);
        assert_eq!(a.short.len(), 12);
        assert!(a.fingerprint.starts_with(a.short.as_str()));
    }

    #[test]
    fn package_order_does_not_change_system_fingerprint() {
        let a = parse_descriptor_str("[system]\npackages = [\"ffmpeg\", \"libsndfile\"]\n")
            .unwrap()
            .normalize()
            .unwrap();
        let b = parse_descriptor_str("[system]\npackages = [\"libsndfile\", \"ffmpeg\"]\n")
            .unwrap()
            .normalize()
            .unwrap();
        assert_eq!(compute_fingerprint(&a), compute_fingerprint(&b));
    }

    #[test]
    fn runtime_version_changes_fingerprint() {
        let base = EnvironmentDescriptor::default();
        let other = EnvironmentDescriptor {
            runtime_version: "3.11".to_owned(),
            ..base.clone()
        };
        assert_ne!(compute_fingerprint(&base), compute_fingerprint(&other));
    }

    #[test]
    fn run_behavior_settings_do_not_change_fingerprint() {
        let base = EnvironmentDescriptor::default();
        let other = EnvironmentDescriptor {
            retry_attempts: 5,
            cleanup_policy: CleanupPolicy::Ignore,
            ..base.clone()
        };
        assert_eq!(compute_fingerprint(&base), compute_fingerprint(&other));
    }

    #[test]
    fn fingerprint_hashes_canonical_json() {
        let d = EnvironmentDescriptor::default();
        let expected = blake3::hash(d.canonical_json().as_bytes()).to_hex().to_string();
        assert_eq!(compute_fingerprint(&d).fingerprint.as_str(), expected);
    }

    #[test]
    fn executable_override_does_not_change_fingerprint() {
        let base = EnvironmentDescriptor::default();
        let other = EnvironmentDescriptor {
            executable: Some("/opt/miniforge/bin/conda".to_owned()),
            ..base.clone()
        };
        assert_eq!(compute_fingerprint(&base), compute_fingerprint(&other));
    }
}
