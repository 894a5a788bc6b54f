//! Routes `kubectl apply` manifests to the clusters named in their annotations.

pub mod args;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod gate;
pub mod ingest;
pub mod resource;
pub mod route;
pub mod runner;
pub mod signals;
pub mod target;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod yaml;
