#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Production implementations of `dump_core`'s trait seams: a real
//! Kubernetes client, a `git`-backed repository, and a sops-like envelope
//! cypher.

pub mod cypher;
pub mod git_repository;
pub mod kube_client;

pub use cypher::{Policy, SopsLikeCypher};
pub use git_repository::GitRepository;
pub use kube_client::KubeClusterClient;
