// ABOUTME: Provider-specific building blocks used by executors and planners.
// ABOUTME: Each submodule owns the resource model and client contract of one provider.

pub mod kubernetes;
pub mod lambda;
