//! kemia submits quantum-chemistry calculations to a SLURM cluster over ssh, tracks each job
//! through its lifecycle and hands out presigned URLs for the artifacts it produces

/// Calculation types and parameters
pub mod calculation;

/// Explicit configuration built by the binary
pub mod config;

/// SQLite job store
pub mod db;

/// Service boundary used by the CLI
pub mod dispatch;

pub mod error;

/// Job records and the store interface
pub mod job;

/// Lifecycle state machine and the terminal upload side effect
pub mod lifecycle;

/// Expected artifacts per calculation type, with presigned URLs
pub mod manifest;

/// Run commands and copy files on the cluster login host
pub mod remote;

/// JSON calculation request messages
pub mod request;

/// SLURM adapter
pub mod slurm;

pub use error::{Error, Result};
