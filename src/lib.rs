//! Lakota: a version-controlled columnar store for numerical series.
//!
//! Bottom-up: [`pod`] is the content-addressed blob store every other
//! layer sits on; [`codec`] and [`segment`] turn a [`frame::Frame`] into
//! content-addressed column blobs; [`commit`] binds a key-range to a
//! segment; [`changelog`] is the Git-like append-only DAG of commits;
//! [`series`] is the public read/write/merge/defrag handle built on top
//! of a changelog; [`collection`] and [`repo`] group series under their
//! own registry changelogs, add push/pull, and own `gc` (it sweeps a
//! namespace shared by every series underneath them, so only they have
//! the full reachable set to sweep against safely).

pub mod changelog;
pub mod codec;
pub mod collection;
pub mod commit;
pub mod digest;
pub mod error;
pub mod frame;
pub mod pod;
pub mod range;
pub mod repo;
pub mod schema;
pub mod segment;
pub mod series;
pub mod worker_pool;

pub use collection::Collection;
pub use digest::Digest;
pub use error::LakotaError;
pub use frame::{Array, Frame, IndexValue};
pub use pod::{Pod, PodRef, PodUri};
pub use repo::Repo;
pub use schema::{Column, ColumnType, Schema};
pub use series::{Closed, Series};
