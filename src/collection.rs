//! Collection: a named set of series sharing one schema, backed by a
//! registry series of its own.
//!
//! The registry's schema is fixed — `{label, digest, meta}` — and never
//! depends on the member series' schema, so the registry is just another
//! `Series` underneath. A collection's own schema (shared by every
//! member) is round-tripped through the *owning* repo's registry row for
//! this collection, in that row's `meta` column, rather than invented as
//! a side channel.

use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::digest::Digest;
use crate::frame::{Array, Frame, IndexValue};
use crate::pod::PodRef;
use crate::schema::{Column, ColumnType, Schema};
use crate::series::{sweep_unreachable, Closed, Series};

pub const CHANGELOG_ROOT: &str = "changelog";
const TOMBSTONE: &str = "tombstone";

/// The fixed three-column shape every registry (collection or repo) uses:
/// `label` indexes the row, `digest` is the hex-encoded identity of
/// whatever `label` names, `meta` is caller-defined free text (a
/// collection's shared schema, serialized as JSON, when the registry
/// belongs to a `Repo`).
pub fn registry_schema() -> Schema {
    Schema::new(vec![
        Column::index("label", ColumnType::Str),
        Column::data("digest", ColumnType::Str),
        Column::data("meta", ColumnType::Str),
    ])
    .expect("registry schema is well-formed by construction")
}

pub(crate) fn registry_row(label: &str, digest_hex: &str, meta: &str) -> Result<Frame> {
    Frame::new(
        registry_schema(),
        vec![
            Array::Str(vec![Some(label.to_string())]),
            Array::Str(vec![Some(digest_hex.to_string())]),
            Array::Str(vec![Some(meta.to_string())]),
        ],
    )
}

/// A single, still-live (non-tombstoned) registry entry.
pub(crate) struct RegistryEntry {
    pub digest_hex: String,
    pub meta: String,
}

pub(crate) fn lookup(registry: &Series, label: &str) -> Result<Option<RegistryEntry>> {
    let key = vec![IndexValue::Str(label.to_string())];
    let frame = registry.read(Some(key.clone()), Some(key), None, Closed::Both)?;
    if frame.is_empty() {
        return Ok(None);
    }
    let row = frame.len() - 1;
    let digest_hex = match frame.column("digest").unwrap() {
        Array::Str(v) => v[row].clone().unwrap_or_default(),
        _ => unreachable!("registry digest column is always Str"),
    };
    let meta = match frame.column("meta").unwrap() {
        Array::Str(v) => v[row].clone().unwrap_or_default(),
        _ => unreachable!("registry meta column is always Str"),
    };
    if meta == TOMBSTONE {
        return Ok(None);
    }
    Ok(Some(RegistryEntry { digest_hex, meta }))
}

pub(crate) fn list_live_labels(registry: &Series) -> Result<Vec<String>> {
    let all = registry.read(None, None, None, Closed::Both)?;
    let labels = match all.column("label") {
        Some(Array::Str(v)) => v,
        _ => return Ok(vec![]),
    };
    let metas = match all.column("meta") {
        Some(Array::Str(v)) => v,
        _ => return Ok(vec![]),
    };
    Ok(labels
        .iter()
        .zip(metas.iter())
        .filter(|(_, meta)| meta.as_deref() != Some(TOMBSTONE))
        .filter_map(|(label, _)| label.clone())
        .collect())
}

pub(crate) fn series_identity(collection_identity: &Digest, label: &str) -> Digest {
    Digest::of(format!("{}/{}", collection_identity.to_hex(), label).as_bytes())
}

pub fn collection_identity(name: &str) -> Digest {
    Digest::of(name.as_bytes())
}

pub(crate) fn changelog_prefix(identity: &Digest) -> String {
    format!("{}/{}", CHANGELOG_ROOT, identity.to_hex())
}

/// The registry series for `identity`, with the fixed registry schema.
/// Used both by `Collection` itself and by `Repo::pull`/`push`, which
/// need to read a collection's member labels without knowing (or caring
/// about) that collection's member schema.
pub(crate) fn registry_series(pod: PodRef, identity: &Digest) -> Series {
    Series::new(pod, registry_schema(), changelog_prefix(identity))
}

pub struct Collection {
    pod: PodRef,
    name: String,
    identity: Digest,
    schema: Schema,
    registry: Series,
}

impl Collection {
    /// Open (or implicitly create, since the registry is just an
    /// append-only series and an empty one is a perfectly valid starting
    /// point) the collection named `name`, whose member series all share
    /// `schema`.
    pub fn open(pod: PodRef, name: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        let identity = collection_identity(&name);
        let registry = registry_series(pod.clone(), &identity);
        Collection {
            pod,
            name,
            identity,
            schema,
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> Digest {
        self.identity
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Register a brand new series under `label`. Errors if the label is
    /// already live (use `open_series` for that, or `drop_series` first).
    pub fn create_series(&self, label: &str) -> Result<Series> {
        if lookup(&self.registry, label)?.is_some() {
            return Err(anyhow!("series '{}' already exists in collection '{}'", label, self.name));
        }
        let identity = series_identity(&self.identity, label);
        self.registry.write(&registry_row(label, &identity.to_hex(), "")?)?;
        Ok(Series::new(self.pod.clone(), self.schema.clone(), changelog_prefix(&identity)))
    }

    /// Open the series registered under `label`.
    pub fn open_series(&self, label: &str) -> Result<Series> {
        let entry = lookup(&self.registry, label)?
            .ok_or_else(|| anyhow!("no series '{}' in collection '{}'", label, self.name))?;
        let identity = Digest::from_hex(&entry.digest_hex)?;
        Ok(Series::new(self.pod.clone(), self.schema.clone(), changelog_prefix(&identity)))
    }

    /// Every live (non-dropped) label, in registry order.
    pub fn list_series(&self) -> Result<Vec<String>> {
        list_live_labels(&self.registry)
    }

    /// Model a delete as a new registry row for `label` whose `meta` is a
    /// tombstone marker — the underlying series' blobs are untouched
    /// until a `gc` finds them unreachable from any live registry entry.
    pub fn drop_series(&self, label: &str) -> Result<()> {
        if lookup(&self.registry, label)?.is_none() {
            return Err(anyhow!("no series '{}' in collection '{}'", label, self.name));
        }
        self.registry.write(&registry_row(label, "", TOMBSTONE)?)?;
        Ok(())
    }

    pub fn registry(&self) -> &Series {
        &self.registry
    }

    /// Sweep blobs no live series (or the registry itself) references any
    /// more. Every member series shares this collection's pod-global
    /// `blobs`/`segments` namespace, so the reachable set swept against
    /// must be the union of the registry's and every live series'
    /// `reachable()` — gc-ing against a single series' reachable set would
    /// delete blobs its siblings still depend on.
    pub fn gc(&self, safety_horizon: Duration) -> Result<usize> {
        let mut reachable = self.registry.reachable()?;
        for label in self.list_series()? {
            let series = self.open_series(&label)?;
            reachable.extend(series.reachable()?);
        }
        sweep_unreachable(&self.pod, &reachable, safety_horizon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Array;
    use crate::pod::MemoryPod;
    use crate::schema::{Column, ColumnType};
    use std::sync::Arc;

    fn series_schema() -> Schema {
        Schema::new(vec![
            Column::index("ts", ColumnType::Int64),
            Column::data("val", ColumnType::Float64),
        ])
        .unwrap()
    }

    fn frame_of(rows: &[(i64, f64)]) -> Frame {
        Frame::new(
            series_schema(),
            vec![
                Array::Int64(rows.iter().map(|(t, _)| Some(*t)).collect()),
                Array::Float64(rows.iter().map(|(_, v)| Some(*v)).collect()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn create_then_open_series_round_trips() {
        let pod: PodRef = Arc::new(MemoryPod::new());
        let collection = Collection::open(pod, "prices", series_schema());
        collection.create_series("eurusd").unwrap();
        let series = collection.open_series("eurusd").unwrap();
        assert_eq!(series.schema(), &series_schema());
    }

    #[test]
    fn creating_a_duplicate_label_errors() {
        let pod: PodRef = Arc::new(MemoryPod::new());
        let collection = Collection::open(pod, "prices", series_schema());
        collection.create_series("eurusd").unwrap();
        assert!(collection.create_series("eurusd").is_err());
    }

    #[test]
    fn dropped_series_is_excluded_from_listing() {
        let pod: PodRef = Arc::new(MemoryPod::new());
        let collection = Collection::open(pod, "prices", series_schema());
        collection.create_series("eurusd").unwrap();
        collection.create_series("gbpusd").unwrap();
        collection.drop_series("eurusd").unwrap();
        assert_eq!(collection.list_series().unwrap(), vec!["gbpusd".to_string()]);
        assert!(collection.open_series("eurusd").is_err());
    }

    #[test]
    fn gc_does_not_delete_a_sibling_series_blobs() {
        let pod: PodRef = Arc::new(MemoryPod::new());
        let collection = Collection::open(pod, "prices", series_schema());

        let eurusd = collection.create_series("eurusd").unwrap().with_embed_threshold(0);
        eurusd.write(&frame_of(&[(1, 1.0), (2, 2.0)])).unwrap();

        let gbpusd = collection.create_series("gbpusd").unwrap().with_embed_threshold(0);
        gbpusd.write(&frame_of(&[(3, 3.0), (4, 4.0)])).unwrap();

        // gc-ing the collection (which sweeps the pod-wide namespace both
        // series share) must not drop gbpusd's blobs just because the
        // reachable set was computed from eurusd alone.
        collection.gc(Duration::from_secs(0)).unwrap();

        let eurusd_out = collection.open_series("eurusd").unwrap().read(None, None, None, Closed::Both).unwrap();
        let gbpusd_out = collection.open_series("gbpusd").unwrap().read(None, None, None, Closed::Both).unwrap();
        assert_eq!(eurusd_out.len(), 2);
        assert_eq!(gbpusd_out.len(), 2);
    }
}
