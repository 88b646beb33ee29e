//! Shared fixtures for tests that need real infrastructure.
//!
//! Tests call [`runtime::ensure_container_runtime`] first and skip themselves
//! when no Docker or Podman socket is reachable.

pub mod postgres;
pub mod runtime;

use uuid::Uuid;

pub(crate) fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}
