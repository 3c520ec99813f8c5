//! Repo: a collection of collections, and the push/pull boundary between
//! two Pods.
//!
//! A repo is shaped exactly like a collection one level up: its own
//! registry series maps collection name -> collection identity, with the
//! collection's shared schema, serialized as JSON, riding along in that
//! row's `meta` column.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::changelog::Revision;
use crate::collection::{
    changelog_prefix, collection_identity, list_live_labels, lookup, registry_row, registry_series, series_identity,
    CHANGELOG_ROOT, Collection,
};
use crate::commit::{Commit, CommitBody};
use crate::digest::Digest;
use crate::pod::PodRef;
use crate::schema::Schema;
use crate::segment::SegmentManifest;
use crate::series::sweep_unreachable;
use crate::worker_pool::ParallelHandler;

/// In-flight blob transfers during a single push/pull.
const SYNC_PARALLELISM: usize = 20;

fn repo_registry_prefix() -> String {
    format!("{}/repo", CHANGELOG_ROOT)
}

pub struct Repo {
    pod: PodRef,
    registry: crate::series::Series,
}

impl Repo {
    pub fn open(pod: PodRef) -> Self {
        let registry = crate::series::Series::new(
            pod.clone(),
            crate::collection::registry_schema(),
            repo_registry_prefix(),
        );
        Repo { pod, registry }
    }

    pub fn create_collection(&self, name: &str, schema: Schema) -> Result<Collection> {
        if lookup(&self.registry, name)?.is_some() {
            return Err(anyhow!("collection '{}' already exists", name));
        }
        let identity = collection_identity(name);
        let meta = serde_json::to_string(&schema).context("serializing collection schema")?;
        self.registry.write(&registry_row(name, &identity.to_hex(), &meta)?)?;
        Ok(Collection::open(self.pod.clone(), name, schema))
    }

    pub fn open_collection(&self, name: &str) -> Result<Collection> {
        let entry = lookup(&self.registry, name)?.ok_or_else(|| anyhow!("no collection '{}'", name))?;
        let schema: Schema = serde_json::from_str(&entry.meta).context("decoding collection schema")?;
        Ok(Collection::open(self.pod.clone(), name, schema))
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        list_live_labels(&self.registry)
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        if lookup(&self.registry, name)?.is_none() {
            return Err(anyhow!("no collection '{}'", name));
        }
        self.registry.write(&registry_row(name, "", "tombstone")?)?;
        Ok(())
    }

    /// Bring everything `remote` has that `self` doesn't: every
    /// collection's registry, every series registered in it, and every
    /// blob those series' new revisions reference.
    pub fn pull(&self, remote: &Repo) -> Result<()> {
        sync_from(remote.pod.clone(), self.pod.clone())
    }

    /// Symmetric to `pull`: push everything `self` has that `remote`
    /// doesn't.
    pub fn push(&self, remote: &Repo) -> Result<()> {
        sync_from(self.pod.clone(), remote.pod.clone())
    }

    /// Sweep blobs no collection registry, series registry, or live
    /// series references any more. Every collection in this repo shares
    /// the repo's pod-global `blobs`/`segments` namespace (each
    /// `Collection` is opened with a clone of `self.pod`), so the
    /// reachable set swept against has to union every one of them, not
    /// just this repo's own registry — the same reason `Collection::gc`
    /// unions across its member series instead of gc-ing one at a time.
    pub fn gc(&self, safety_horizon: Duration) -> Result<usize> {
        let mut reachable = self.registry.reachable()?;
        for name in self.list_collections()? {
            let collection = self.open_collection(&name)?;
            reachable.extend(collection.registry().reachable()?);
            for label in collection.list_series()? {
                let series = collection.open_series(&label)?;
                reachable.extend(series.reachable()?);
            }
        }
        sweep_unreachable(&self.pod, &reachable, safety_horizon)
    }
}

/// Copy revision keys present under `prefix` in `src` but absent in
/// `dst`, and return them parsed, newest first is not guaranteed (callers
/// don't rely on order).
fn sync_changelog_keys(src: &PodRef, dst: &PodRef, prefix: &str) -> Result<Vec<Revision>> {
    let mut full_prefix = prefix.to_string();
    if !full_prefix.ends_with('/') {
        full_prefix.push('/');
    }
    let src_keys: HashSet<String> = src.list(&full_prefix)?.into_iter().collect();
    let dst_keys: HashSet<String> = dst.list(&full_prefix)?.into_iter().collect();

    let mut new_revisions = Vec::new();
    for key in src_keys.difference(&dst_keys) {
        let bytes = src.get_required(key)?;
        dst.put(key, &bytes)?;
        let suffix = key.strip_prefix(&full_prefix).unwrap_or(key);
        new_revisions.push(Revision::parse(suffix)?);
    }
    Ok(new_revisions)
}

/// Walk a commit's dependency tree (commit blob, segment manifest, column
/// blobs), appending every not-yet-seen key to `out`. `seen` is shared
/// across the whole sync so a blob two series happen to share (an
/// unchanged index column, say) is only queued once.
fn collect_reachable_keys(src: &PodRef, commit_digest: &Digest, seen: &mut HashSet<String>, out: &mut Vec<String>) -> Result<()> {
    let commit_key = commit_digest.pod_key("commits");
    if !seen.insert(commit_key.clone()) {
        return Ok(());
    }
    let commit_bytes = src.get_required(&commit_key)?;
    out.push(commit_key);

    let commit = Commit::from_bytes(&commit_bytes)?;
    if let CommitBody::Segment(segment_digest) = &commit.body {
        let segment_key = segment_digest.pod_key("segments");
        if seen.insert(segment_key.clone()) {
            let manifest_bytes = src.get_required(&segment_key)?;
            out.push(segment_key);
            let manifest: SegmentManifest =
                serde_json::from_slice(&manifest_bytes).context("decoding segment manifest during sync")?;
            for col in manifest.columns {
                let digest = Digest::from_hex(&col.digest)?;
                let blob_key = digest.pod_key("blobs");
                if seen.insert(blob_key.clone()) {
                    out.push(blob_key);
                }
            }
        }
    }
    Ok(())
}

/// Fan a flat list of content-addressed keys out across a bounded pool of
/// workers, each doing a plain get-then-put. Safe to call with an empty
/// list.
fn copy_blobs(src: &PodRef, dst: &PodRef, keys: Vec<String>) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }
    let pool = ParallelHandler::new("lakota-sync", SYNC_PARALLELISM, {
        let src = src.clone();
        let dst = dst.clone();
        move |key: String| {
            let bytes = src.get_required(&key)?;
            dst.put(&key, &bytes)
        }
    });
    let tx = pool.channel();
    for key in keys {
        tx.send(key).map_err(|_| anyhow!("sync worker pool channel closed early"))?;
    }
    drop(tx);
    pool.complete()
}

/// The actual copy direction-agnostic sync: bring everything reachable
/// from `src`'s registries into `dst`.
fn sync_from(src: PodRef, dst: PodRef) -> Result<()> {
    log::info!("sync: starting repo-level transfer");
    sync_changelog_keys(&src, &dst, &repo_registry_prefix())?;

    let dst_repo_registry =
        crate::series::Series::new(dst.clone(), crate::collection::registry_schema(), repo_registry_prefix());
    let collection_names = list_live_labels(&dst_repo_registry)?;

    let seen_blobs = Arc::new(Mutex::new(HashSet::new()));
    for name in collection_names {
        let identity = collection_identity(&name);
        let prefix = changelog_prefix(&identity);
        sync_changelog_keys(&src, &dst, &prefix)?;

        let collection_registry = registry_series(dst.clone(), &identity);
        for label in list_live_labels(&collection_registry)? {
            let series_id = series_identity(&identity, &label);
            let series_prefix = changelog_prefix(&series_id);
            let new_revisions = sync_changelog_keys(&src, &dst, &series_prefix)?;

            let mut keys = Vec::new();
            {
                let mut seen = seen_blobs.lock().unwrap();
                for rev in &new_revisions {
                    collect_reachable_keys(&src, &rev.own_digest, &mut seen, &mut keys)?;
                }
            }
            log::info!("sync: {} new revision(s), {} new blob(s) for series '{}'", new_revisions.len(), keys.len(), label);
            copy_blobs(&src, &dst, keys)?;
        }
    }
    Ok(())
}
