//! kubeapply - A GitOps webhook engine that diffs and applies Kubernetes
//! manifests in response to pull request comments.
//!
//! This library provides the command parser, cluster coverage resolution,
//! status codec, event dispatcher and HTTP server behind the binary.

pub mod cluster;
pub mod commands;
pub mod config;
pub mod coverage;
pub mod git;
pub mod github;
pub mod handler;
pub mod pullreq;
pub mod server;
pub mod status;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub mod test_utils;
