// ABOUTME: Serverless function provider: function manifests, client contract, traffic routing.
// ABOUTME: Each application talks to the client registered under its cloud provider name.

mod client;
mod function;
mod memory;
mod traffic;

pub use client::{LambdaClient, LambdaError};
pub use function::{FunctionManifest, FunctionSpec, load_function_manifest};
pub use memory::InMemoryLambdaClient;
pub use traffic::{RoutingTrafficConfig, VersionTraffic, configure_traffic_routing};
