//! Structured error kinds.
//!
//! Every fallible public function in this crate returns `anyhow::Result`.
//! Call sites that need to branch on *why* something failed match on
//! `err.downcast_ref::<LakotaError>()` instead of matching on a message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LakotaError {
    #[error("pod key not found: {0}")]
    PodNotFound(String),

    #[error("pod I/O error on {key}: {source}")]
    PodIo {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("data missing: revision references digest {0} which is absent from the pod")]
    DataMissing(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("empty write")]
    EmptyWrite,

    #[error("remote I/O error: {0}")]
    RemoteIo(String),
}
