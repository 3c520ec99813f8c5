//! Series: a single versioned column group, built on a changelog of
//! commits.
//!
//! `read` walks revisions newest-first and "wins" the part of the query
//! range each commit still covers; `write` appends one or more commits
//! off the current head (or heads, if divergent); `merge` reconciles
//! divergent heads without rewriting history; `defrag`/`squash` collapse
//! history into fewer, larger commits. `reachable` computes this one
//! series' live blob set; actually sweeping unreferenced blobs
//! (`sweep_unreachable`) is done at the `Collection`/`Repo` level, since
//! the blob/segment namespace it sweeps is shared by every series on the
//! same pod.

use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

use crate::changelog::{Changelog, Revision};
use crate::codec::{Codec, ZstdCodec};
use crate::commit::{row_bounds, Commit, CommitBody, DEFAULT_EMBED_THRESHOLD};
use crate::digest::Digest;
use crate::error::LakotaError;
use crate::frame::{Frame, IndexKey};
use crate::pod::PodRef;
use crate::range::{Bound, Interval};
use crate::schema::Schema;
use crate::segment::SegmentManifest;

/// Writes larger than this are split into multiple commits on index-key
/// boundaries, so no single commit blob grows unbounded.
pub const DEFAULT_SPLIT_THRESHOLD: usize = 500_000;

/// How long a GC pass waits before reclaiming an unreferenced blob, to
/// give a concurrent writer time to commit the revision that would have
/// referenced it.
pub const DEFAULT_GC_SAFETY_HORIZON: Duration = Duration::from_secs(60);

const COMMIT_PREFIX: &str = "commits";
const SEGMENT_PREFIX: &str = "segments";
const BLOB_PREFIX: &str = "blobs";

/// Which side(s) of a `[start, stop]` query range are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Closed {
    Left,
    Right,
    #[default]
    Both,
    Neither,
}

impl Closed {
    fn lo(&self, key: IndexKey) -> Bound<IndexKey> {
        match self {
            Closed::Left | Closed::Both => Bound::Incl(key),
            Closed::Right | Closed::Neither => Bound::Excl(key),
        }
    }

    fn hi(&self, key: IndexKey) -> Bound<IndexKey> {
        match self {
            Closed::Right | Closed::Both => Bound::Incl(key),
            Closed::Left | Closed::Neither => Bound::Excl(key),
        }
    }
}

pub struct Series {
    pod: PodRef,
    schema: Schema,
    changelog: Changelog,
    codec: Box<dyn Codec>,
    embed_threshold: usize,
    split_threshold: usize,
}

impl Series {
    pub fn new(pod: PodRef, schema: Schema, prefix: impl Into<String>) -> Self {
        Series::with_codec(pod, schema, prefix, Box::new(ZstdCodec))
    }

    pub fn with_codec(pod: PodRef, schema: Schema, prefix: impl Into<String>, codec: Box<dyn Codec>) -> Self {
        let changelog = Changelog::new(pod.clone(), prefix);
        Series {
            pod,
            schema,
            changelog,
            codec,
            embed_threshold: DEFAULT_EMBED_THRESHOLD,
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
        }
    }

    /// Override the row count below which a write's commit embeds its
    /// frame directly instead of writing a segment. Exposed for callers
    /// (and tests) that need to force one or the other.
    pub fn with_embed_threshold(mut self, embed_threshold: usize) -> Self {
        self.embed_threshold = embed_threshold;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn heads(&self) -> Result<Vec<Revision>> {
        self.changelog.heads()
    }

    pub fn is_divergent(&self) -> Result<bool> {
        Ok(self.heads()?.len() > 1)
    }

    fn load_commit(&self, digest: &Digest) -> Result<Commit> {
        let bytes = self
            .pod
            .get(&digest.pod_key(COMMIT_PREFIX))?
            .ok_or_else(|| LakotaError::DataMissing(digest.to_hex()))?;
        Commit::from_bytes(&bytes)
    }

    fn put_commit(&self, commit: &Commit) -> Result<Digest> {
        let bytes = commit.to_bytes()?;
        let digest = Digest::of(&bytes);
        self.pod.put(&digest.pod_key(COMMIT_PREFIX), &bytes)?;
        Ok(digest)
    }

    /// Read the rows whose index key falls in `[start, stop]` (subject to
    /// `closed`), as of `before` (a changelog epoch cutoff; `None` means
    /// "now", i.e. no cutoff).
    ///
    /// Walks every head no newer than `before`, then each head's ancestry
    /// back to the root, newest-first overall; each commit "wins" the
    /// slice of the still-unmasked query range it overlaps, and whatever
    /// remains unmasked after the oldest commit is simply absent from the
    /// result (never an error — an empty series region is not missing
    /// data).
    pub fn read(
        &self,
        start: Option<IndexKey>,
        stop: Option<IndexKey>,
        before: Option<u64>,
        closed: Closed,
    ) -> Result<Frame> {
        let query = Interval {
            lo: start.map(|k| closed.lo(k)).unwrap_or(Bound::NegInf),
            hi: stop.map(|k| closed.hi(k)).unwrap_or(Bound::PosInf),
        };

        let heads = match before {
            Some(cutoff) => self.changelog.heads_as_of(cutoff)?,
            None => self.changelog.heads()?,
        };

        let mut seen = HashSet::new();
        let mut revisions = Vec::new();
        for head in &heads {
            for rev in self.changelog.walk(head)? {
                if seen.insert((rev.own_epoch, rev.own_digest)) {
                    revisions.push(rev);
                }
            }
        }
        revisions.sort_by(|a, b| b.own_epoch.cmp(&a.own_epoch).then(b.own_digest.cmp(&a.own_digest)));

        let mut remaining = vec![query];
        let mut winners: Vec<(Interval<IndexKey>, Commit)> = Vec::new();
        for rev in &revisions {
            if remaining.is_empty() {
                break;
            }
            let commit = self.load_commit(&rev.own_digest)?;
            let commit_interval = commit.interval();
            let mut next_remaining = Vec::new();
            for piece in &remaining {
                if let Some(overlap) = piece.intersect(&commit_interval) {
                    winners.push((overlap, commit.clone()));
                }
                next_remaining.extend(piece.subtract(&commit_interval));
            }
            remaining = next_remaining;
        }

        winners.sort_by(|a, b| a.0.lo.cmp_as_lo(&b.0.lo));

        let mut out: Option<Frame> = None;
        for (sub_range, commit) in &winners {
            let piece = commit
                .slice(sub_range, self.pod.as_ref(), self.codec.as_ref(), &self.schema)
                .with_context(|| format!("slicing commit covering {:?}..{:?}", commit.start, commit.stop))?;
            out = Some(match out {
                None => piece,
                Some(acc) => acc.concat(&piece)?,
            });
        }

        match out {
            Some(frame) => Ok(frame),
            None => Frame::new(
                self.schema.clone(),
                self.schema
                    .columns()
                    .iter()
                    .map(|c| crate::frame::Array::empty(c.ty))
                    .collect(),
            ),
        }
    }

    fn split_rows(&self, frame: &Frame) -> Vec<Frame> {
        if frame.len() <= self.split_threshold {
            return vec![frame.clone()];
        }
        let mut out = Vec::new();
        let mut start = 0;
        while start < frame.len() {
            let end = (start + self.split_threshold).min(frame.len());
            out.push(frame.slice_rows(start, end));
            start = end;
        }
        out
    }

    /// Picks the lexicographically-greatest revision key among `heads` as
    /// the current parent to write off of. A divergent write doesn't
    /// merge anything; it just picks one branch and keeps going, same as
    /// any other `append`.
    fn pick_parent(heads: &[Revision]) -> Option<Revision> {
        heads
            .iter()
            .copied()
            .max_by_key(|r| (r.parent_epoch, r.parent_digest, r.own_epoch, r.own_digest))
    }

    /// Sort and dedup `frame`, split it into chunks no larger than the
    /// split threshold, and append one commit per chunk off the current
    /// head. Returns `None` for an all-duplicate or empty write.
    pub fn write(&self, frame: &Frame) -> Result<Option<Revision>> {
        if frame.schema() != &self.schema {
            anyhow::bail!(LakotaError::SchemaMismatch(
                "write schema does not match series schema".to_string()
            ));
        }
        let sorted = frame.sort_and_dedup()?;
        if sorted.is_empty() {
            return Ok(None);
        }

        let heads = self.changelog.heads()?;
        let mut parent = Self::pick_parent(&heads);
        let mut last = None;
        let chunks = self.split_rows(&sorted);
        log::info!("writing {} row(s) as {} commit(s)", sorted.len(), chunks.len());
        for chunk in chunks {
            let commit = Commit::build(&chunk, self.pod.as_ref(), self.codec.as_ref(), self.embed_threshold)?;
            let digest = self.put_commit(&commit)?;
            let revision = self.changelog.append(parent.as_ref(), digest)?;
            parent = Some(revision);
            last = Some(revision);
        }
        Ok(last)
    }

    /// Reconcile divergent heads into one new commit per original head,
    /// each still covering its original head's (start, stop) range but
    /// now reflecting the merged, canonical view of the whole series.
    /// History isn't rewritten: every original revision stays reachable,
    /// a fresh revision is appended off each head.
    pub fn merge(&self) -> Result<Vec<Revision>> {
        let heads = self.changelog.heads()?;
        if heads.len() <= 1 {
            return Ok(heads);
        }
        log::info!("merging {} divergent heads", heads.len());

        let canonical = self.read(None, None, None, Closed::Both)?;
        let mut new_heads = Vec::new();
        for head in &heads {
            let head_commit = self.load_commit(&head.own_digest)?;
            let sub_range = head_commit.interval();
            let (start, end) = row_bounds(&canonical, &sub_range)?;
            let merged = canonical.slice_rows(start, end);
            if merged.is_empty() {
                continue;
            }
            let new_commit = Commit::build(&merged, self.pod.as_ref(), self.codec.as_ref(), self.embed_threshold)?;
            let digest = self.put_commit(&new_commit)?;
            new_heads.push(self.changelog.append(Some(head), digest)?);
        }
        Ok(new_heads)
    }

    /// Rewrite the whole changelog into a linear chain of larger commits
    /// off the zero sentinel, then delete the old revisions now that
    /// their replacements are durable.
    pub fn defrag(&self) -> Result<Option<Revision>> {
        let full = self.read(None, None, None, Closed::Both)?;
        let old_revisions = self.changelog.log()?;
        let last = self.rebuild_chain(&full, None)?;
        for rev in &old_revisions {
            self.changelog.delete(rev)?;
        }
        Ok(last)
    }

    /// Like `defrag`, but only collapses history older than
    /// `cutoff_epoch`: a single snapshot commit replaces everything
    /// before the cutoff, and revisions at or after it are replayed
    /// (same commit content, re-parented) on top of it. Revisions whose
    /// own epoch is already `>= cutoff_epoch` aren't re-encoded, only
    /// re-appended, so their blobs are reused as-is.
    pub fn squash(&self, cutoff_epoch: u64) -> Result<Option<Revision>> {
        let mut chain = self.changelog.log()?;
        chain.reverse(); // oldest first; squash assumes a converged (single-chain) history.
        let (old, recent): (Vec<_>, Vec<_>) = chain.into_iter().partition(|r| r.own_epoch < cutoff_epoch);
        if old.is_empty() {
            return Ok(None);
        }

        let snapshot = self.read(None, None, Some(cutoff_epoch.saturating_sub(1)), Closed::Both)?;
        let mut parent = self.rebuild_chain(&snapshot, None)?;

        for rev in &recent {
            parent = Some(self.changelog.append(parent.as_ref(), rev.own_digest)?);
        }

        for rev in old.iter().chain(recent.iter()) {
            self.changelog.delete(rev)?;
        }
        Ok(parent)
    }

    fn rebuild_chain(&self, frame: &Frame, mut parent: Option<Revision>) -> Result<Option<Revision>> {
        if frame.is_empty() {
            return Ok(parent);
        }
        for chunk in self.split_rows(frame) {
            let commit = Commit::build(&chunk, self.pod.as_ref(), self.codec.as_ref(), self.embed_threshold)?;
            let digest = self.put_commit(&commit)?;
            parent = Some(self.changelog.append(parent.as_ref(), digest)?);
        }
        Ok(parent)
    }

    /// Every blob digest reachable from a live revision: the commit blob
    /// itself, and (for segment-backed commits) the segment manifest and
    /// each column blob it names.
    pub fn reachable(&self) -> Result<HashSet<String>> {
        let mut reachable = HashSet::new();
        for head in self.changelog.heads()? {
            for rev in self.changelog.walk(&head)? {
                let commit_key = rev.own_digest.pod_key(COMMIT_PREFIX);
                if !reachable.insert(commit_key) {
                    continue; // already walked this commit's dependencies via a shared ancestor.
                }
                let commit = self.load_commit(&rev.own_digest)?;
                if let CommitBody::Segment(segment_digest) = &commit.body {
                    let segment_key = segment_digest.pod_key(SEGMENT_PREFIX);
                    let manifest_bytes = self.pod.get_required(&segment_key)?;
                    reachable.insert(segment_key);
                    let manifest: SegmentManifest =
                        serde_json::from_slice(&manifest_bytes).context("decoding segment manifest during gc")?;
                    for col in manifest.columns {
                        let digest = Digest::from_hex(&col.digest)?;
                        reachable.insert(digest.pod_key(BLOB_PREFIX));
                    }
                }
            }
        }
        Ok(reachable)
    }
}

/// Delete every segment/blob key under `pod` not in `reachable`, unless
/// the backend reports it was modified more recently than
/// `safety_horizon` ago (protects a blob a concurrent writer just created
/// but hasn't committed a revision for yet). Backends that can't report
/// mtime (see `Pod::mtime`) get no such protection here.
///
/// `blobs`/`segments` are pod-global namespaces shared by every series a
/// `Collection`/`Repo` hands the same pod to, so `reachable` must already
/// be the union of every live series' (and registry's) `reachable()` set
/// sharing that pod — sweeping against any single series' reachable set
/// would delete blobs other series still depend on.
pub(crate) fn sweep_unreachable(pod: &PodRef, reachable: &HashSet<String>, safety_horizon: Duration) -> Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    for prefix in [SEGMENT_PREFIX, BLOB_PREFIX] {
        for key in pod.walk(prefix)? {
            if reachable.contains(&key) {
                continue;
            }
            if let Some(mtime) = pod.mtime(&key)? {
                if now.duration_since(mtime).unwrap_or_default() < safety_horizon {
                    log::debug!("gc: sparing {} (younger than safety horizon)", key);
                    continue;
                }
            }
            pod.delete(&key)?;
            removed += 1;
        }
    }
    log::info!("gc: removed {} unreachable blob(s)", removed);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Array;
    use crate::pod::MemoryPod;
    use crate::schema::{Column, ColumnType};
    use std::sync::Arc;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::index("ts", ColumnType::Int64),
            Column::data("val", ColumnType::Float64),
        ])
        .unwrap()
    }

    fn frame_of(rows: &[(i64, f64)]) -> Frame {
        Frame::new(
            schema(),
            vec![
                Array::Int64(rows.iter().map(|(t, _)| Some(*t)).collect()),
                Array::Float64(rows.iter().map(|(_, v)| Some(*v)).collect()),
            ],
        )
        .unwrap()
    }

    fn series() -> Series {
        Series::new(Arc::new(MemoryPod::new()), schema(), "series/test")
    }

    #[test]
    fn write_then_read_round_trips() {
        let series = series();
        series.write(&frame_of(&[(1, 1.0), (2, 2.0), (3, 3.0)])).unwrap();
        let out = series.read(None, None, None, Closed::Both).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.column("val").unwrap().len(), 3);
    }

    #[test]
    fn later_write_wins_over_an_overlapping_range() {
        let series = series();
        series.write(&frame_of(&[(1, 1.0), (2, 2.0), (3, 3.0)])).unwrap();
        series.write(&frame_of(&[(2, 20.0), (3, 30.0), (4, 40.0)])).unwrap();
        let out = series.read(None, None, None, Closed::Both).unwrap();
        assert_eq!(out.len(), 4);
        match out.column("val").unwrap() {
            Array::Float64(v) => assert_eq!(v, &vec![Some(1.0), Some(20.0), Some(30.0), Some(40.0)]),
            _ => panic!("wrong column type"),
        }
    }

    #[test]
    fn read_range_is_bounded_by_start_and_stop() {
        let series = series();
        series
            .write(&frame_of(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]))
            .unwrap();
        let out = series
            .read(
                Some(vec![crate::frame::IndexValue::Int64(2)]),
                Some(vec![crate::frame::IndexValue::Int64(3)]),
                None,
                Closed::Both,
            )
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn closed_neither_excludes_both_endpoints() {
        let series = series();
        series
            .write(&frame_of(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]))
            .unwrap();
        let out = series
            .read(
                Some(vec![crate::frame::IndexValue::Int64(1)]),
                Some(vec![crate::frame::IndexValue::Int64(4)]),
                None,
                Closed::Neither,
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.index_key(0).unwrap(), vec![crate::frame::IndexValue::Int64(2)]);
    }

    #[test]
    fn empty_write_is_a_no_op() {
        let series = series();
        let result = series.write(&frame_of(&[])).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn concurrent_writes_diverge_and_merge_reconciles() {
        let series = series();
        series.write(&frame_of(&[(1, 1.0), (2, 2.0)])).unwrap();
        // simulate two writers racing off the same head by appending
        // directly through the changelog with the same parent.
        let head = series.heads().unwrap().into_iter().next().unwrap();
        let commit_a = Commit::build(
            &frame_of(&[(3, 3.0)]),
            series.pod.as_ref(),
            series.codec.as_ref(),
            series.embed_threshold,
        )
        .unwrap();
        let digest_a = series.put_commit(&commit_a).unwrap();
        series.changelog.append(Some(&head), digest_a).unwrap();

        let commit_b = Commit::build(
            &frame_of(&[(3, 30.0), (4, 40.0)]),
            series.pod.as_ref(),
            series.codec.as_ref(),
            series.embed_threshold,
        )
        .unwrap();
        let digest_b = series.put_commit(&commit_b).unwrap();
        series.changelog.append(Some(&head), digest_b).unwrap();

        assert!(series.is_divergent().unwrap());
        let merged_heads = series.merge().unwrap();
        assert_eq!(merged_heads.len(), 2);

        let out = series.read(None, None, None, Closed::Both).unwrap();
        // both branches now materialize the same canonical view over
        // their own (start, stop) window; branch b's row 3 (30.0) is
        // newer and wins over branch a's.
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn defrag_collapses_history_without_losing_data() {
        let series = series();
        for row in [(1, 1.0), (2, 2.0), (3, 3.0)] {
            series.write(&frame_of(&[row])).unwrap();
        }
        assert_eq!(series.changelog.log().unwrap().len(), 3);
        series.defrag().unwrap();
        assert_eq!(series.changelog.log().unwrap().len(), 1);
        let out = series.read(None, None, None, Closed::Both).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn reachable_set_is_nonempty_after_a_segment_backed_write() {
        let series = series();
        series.write(&frame_of(&[(1, 1.0)])).unwrap();
        // force a segment-backed commit so there's a column blob to reclaim.
        let series = series.with_embed_threshold(0);
        series.write(&frame_of(&[(2, 2.0), (3, 3.0)])).unwrap();
        let reachable = series.reachable().unwrap();
        assert!(!reachable.is_empty());

        let removed = sweep_unreachable(&series.pod, &reachable, Duration::from_secs(0)).unwrap();
        assert_eq!(removed, 0, "everything currently written is still reachable");
    }

    #[test]
    fn read_with_before_cutoff_returns_the_historical_slice_not_an_empty_frame() {
        let series = series();
        series.write(&frame_of(&[(1, 1.0), (2, 2.0)])).unwrap();
        let cutoff = series.heads().unwrap()[0].own_epoch;
        series.write(&frame_of(&[(3, 3.0)])).unwrap();

        // as of the first write's own epoch, the second write shouldn't be
        // visible, but the first write's rows must still be.
        let out = series.read(None, None, Some(cutoff), Closed::Both).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(
            out.index_key(1).unwrap(),
            vec![crate::frame::IndexValue::Int64(2)]
        );

        let now = series.read(None, None, None, Closed::Both).unwrap();
        assert_eq!(now.len(), 3);
    }

    #[test]
    fn squash_collapses_old_history_without_losing_pre_cutoff_rows() {
        let series = series();
        series.write(&frame_of(&[(1, 1.0)])).unwrap();
        series.write(&frame_of(&[(2, 2.0)])).unwrap();
        let cutoff = series.heads().unwrap()[0].own_epoch + 1;
        series.write(&frame_of(&[(3, 3.0)])).unwrap();

        series.squash(cutoff).unwrap();

        let out = series.read(None, None, None, Closed::Both).unwrap();
        assert_eq!(out.len(), 3);
        match out.column("val").unwrap() {
            Array::Float64(v) => assert_eq!(v, &vec![Some(1.0), Some(2.0), Some(3.0)]),
            _ => panic!("wrong column type"),
        }
    }
}
