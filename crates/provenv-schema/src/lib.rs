//! Descriptor parsing, normalization, and dependency sources for provenv.
//!
//! This crate defines the schema layer: the optional TOML descriptor file
//! (`DescriptorV1`) with its compiled-in defaults, the validated
//! `EnvironmentDescriptor`, the descriptor fingerprint, `requirements.txt`
//! parsing, and resolution of the language dependency source (manifest file or
//! fallback list).

pub mod descriptor;
pub mod identity;
pub mod normalize;
pub mod requirements;
pub mod source;
pub mod types;

pub use descriptor::{
    load_descriptor, parse_descriptor_file, parse_descriptor_str, CleanupPolicy,
    CleanupSection, DescriptorError, DescriptorOverrides, DescriptorV1, EnvironmentSection,
    LanguageSection, ManagerSection, RetrySection, SystemSection, DEFAULT_BACKEND,
    DEFAULT_CHANNEL, DEFAULT_DESCRIPTOR_FILE, DEFAULT_ENV_NAME, DEFAULT_MANIFEST,
    DEFAULT_RUNTIME_VERSION, DEFAULT_SYSTEM_PACKAGES, FALLBACK_LANGUAGE_PACKAGES,
    SUPPORTED_BACKENDS,
};
pub use identity::{compute_fingerprint, DescriptorFingerprint};
pub use normalize::EnvironmentDescriptor;
pub use requirements::{parse_requirements_str, Requirement, RequirementsManifest};
pub use source::{resolve_dependency_source, DependencySource};
pub use types::{EnvName, Fingerprint, ShortFingerprint};
