//! Changelog: a Git-like append-only DAG of revisions.
//!
//! A revision's key encodes both its parent and its own (epoch, commit
//! digest) pair, so `heads()` needs nothing but a single prefix `list()`
//! — no blob reads, no separate head pointer to keep consistent. Writers
//! never lock anything: two concurrent appends off the same parent both
//! land and both become heads, and it's up to a reader (or an explicit
//! `merge`) to resolve the divergence.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};

use crate::digest::Digest;
use crate::pod::PodRef;

static LAST_EPOCH: AtomicU64 = AtomicU64::new(0);

/// Microsecond wall-clock epoch, nudged forward when necessary so it
/// never repeats or goes backward within this process.
fn now_micros() -> u64 {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    loop {
        let last = LAST_EPOCH.load(Ordering::SeqCst);
        let next = wall.max(last + 1);
        if LAST_EPOCH
            .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return next;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Revision {
    pub parent_epoch: u64,
    pub parent_digest: Digest,
    pub own_epoch: u64,
    pub own_digest: Digest,
}

impl Revision {
    /// The sentinel "no parent" identity: the zero-commit at epoch 0.
    pub const ROOT: (u64, Digest) = (0, Digest::ZERO);

    fn own_id(&self) -> (u64, Digest) {
        (self.own_epoch, self.own_digest)
    }

    fn parent_id(&self) -> (u64, Digest) {
        (self.parent_epoch, self.parent_digest)
    }

    fn suffix(&self) -> String {
        format!(
            "{:016x}-{}.{:016x}-{}",
            self.parent_epoch,
            self.parent_digest.to_hex(),
            self.own_epoch,
            self.own_digest.to_hex()
        )
    }

    pub(crate) fn parse(suffix: &str) -> Result<Self> {
        let (parent_part, own_part) = suffix
            .split_once('.')
            .ok_or_else(|| anyhow!("malformed revision key: {}", suffix))?;
        let (pe, pd) = parent_part
            .split_once('-')
            .ok_or_else(|| anyhow!("malformed revision parent: {}", parent_part))?;
        let (oe, od) = own_part
            .split_once('-')
            .ok_or_else(|| anyhow!("malformed revision own id: {}", own_part))?;
        Ok(Revision {
            parent_epoch: u64::from_str_radix(pe, 16)?,
            parent_digest: Digest::from_hex(pd)?,
            own_epoch: u64::from_str_radix(oe, 16)?,
            own_digest: Digest::from_hex(od)?,
        })
    }
}

/// Revisions nobody else in `revisions` names as parent, newest first.
fn heads_among(revisions: Vec<Revision>) -> Vec<Revision> {
    let parent_ids: HashSet<(u64, Digest)> = revisions.iter().map(|r| r.parent_id()).collect();
    let mut heads: Vec<Revision> = revisions
        .into_iter()
        .filter(|r| !parent_ids.contains(&r.own_id()))
        .collect();
    heads.sort_by(|a, b| b.own_epoch.cmp(&a.own_epoch).then(b.own_digest.cmp(&a.own_digest)));
    heads
}

pub struct Changelog {
    pod: PodRef,
    prefix: String,
}

impl Changelog {
    pub fn new(pod: PodRef, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Changelog { pod, prefix }
    }

    pub(crate) fn key_for(&self, revision: &Revision) -> String {
        format!("{}{}", self.prefix, revision.suffix())
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    fn all_revisions(&self) -> Result<Vec<Revision>> {
        let keys = self.pod.list(&self.prefix)?;
        keys.iter()
            .map(|k| {
                let suffix = k.strip_prefix(&self.prefix).unwrap_or(k);
                Revision::parse(suffix)
            })
            .collect()
    }

    /// Append a new revision with `parent` as its parent (`None` means
    /// the zero sentinel, i.e. this is the first commit). Re-appending a
    /// revision that already exists is a no-op: the key is fully
    /// determined by its content, so the PUT is idempotent.
    pub fn append(&self, parent: Option<&Revision>, commit_digest: Digest) -> Result<Revision> {
        let (parent_epoch, parent_digest) = parent.map(|r| r.own_id()).unwrap_or(Revision::ROOT);
        let revision = Revision {
            parent_epoch,
            parent_digest,
            own_epoch: now_micros(),
            own_digest: commit_digest,
        };
        let key = self.key_for(&revision);
        self.pod.put(&key, &[])?;
        log::debug!("changelog {}: appended revision {}", self.prefix, revision.suffix());
        Ok(revision)
    }

    /// Revisions nobody else names as their parent: the current
    /// concurrent-write frontier. More than one means the series is
    /// divergent.
    pub fn heads(&self) -> Result<Vec<Revision>> {
        let heads = heads_among(self.all_revisions()?);
        if heads.len() > 1 {
            log::warn!("changelog {} is divergent: {} heads", self.prefix, heads.len());
        }
        Ok(heads)
    }

    /// Heads of the changelog as it stood at `cutoff`: revisions with
    /// `own_epoch <= cutoff` that no other such revision names as parent.
    /// Computed from the epoch-filtered survivor set directly rather than
    /// by epoch-filtering the *current* heads, since on a converged
    /// single-chain changelog the live head's epoch is always the newest
    /// and would be dropped by almost any real cutoff, which would leave
    /// no starting point to walk history from at all.
    pub fn heads_as_of(&self, cutoff: u64) -> Result<Vec<Revision>> {
        let survivors: Vec<Revision> = self
            .all_revisions()?
            .into_iter()
            .filter(|r| r.own_epoch <= cutoff)
            .collect();
        Ok(heads_among(survivors))
    }

    /// Every revision, newest-first by own epoch (digest as tiebreak).
    pub fn log(&self) -> Result<Vec<Revision>> {
        let mut revisions = self.all_revisions()?;
        revisions.sort_by(|a, b| b.own_epoch.cmp(&a.own_epoch).then(b.own_digest.cmp(&a.own_digest)));
        Ok(revisions)
    }

    /// Remove a revision's key outright. Used by defrag/squash once the
    /// revision's replacement is durable; never call this on a revision
    /// still reachable as someone's parent.
    pub fn delete(&self, revision: &Revision) -> Result<()> {
        self.pod.delete(&self.key_for(revision))
    }

    /// Follow parent pointers from `head` back to the root, inclusive,
    /// newest-first.
    pub fn walk(&self, head: &Revision) -> Result<Vec<Revision>> {
        let revisions = self.all_revisions()?;
        let by_own: HashMap<(u64, Digest), Revision> =
            revisions.into_iter().map(|r| (r.own_id(), r)).collect();

        let mut out = Vec::new();
        let mut current = Some(*head);
        while let Some(rev) = current {
            let parent_id = rev.parent_id();
            out.push(rev);
            if parent_id == Revision::ROOT {
                break;
            }
            current = by_own.get(&parent_id).copied();
        }
        Ok(out)
    }
}
