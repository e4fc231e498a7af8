// ABOUTME: Kubernetes resource model, manifest loading, and the apply/delete client.
// ABOUTME: Manifests are kept as generic JSON documents keyed by resource identity.

mod applier;
mod loader;
mod manifest;

pub use applier::{ApplyError, Applier, DEFAULT_KUBECTL_TIMEOUT, Kubectl};
pub use loader::{load_manifests, parse_manifests};
pub use manifest::{Manifest, ManifestError, ResourceKey};

pub const KIND_DEPLOYMENT: &str = "Deployment";
pub const KIND_SERVICE: &str = "Service";
pub const KIND_CONFIG_MAP: &str = "ConfigMap";
pub const KIND_SECRET: &str = "Secret";

pub const DEFAULT_NAMESPACE: &str = "default";
