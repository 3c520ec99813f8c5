//! Pod URI parsing: `memory://`, `file://`, `s3://bucket/prefix`, and
//! cache chains joined with `+` or spelled out as a JSON list, fastest
//! tier first.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use super::{CachePod, FilesystemPod, MemoryPod, Pod, PodRef, S3Pod};

const CACHE_ENV_VAR: &str = "LAKOTA_CACHE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodUri {
    Memory,
    File(PathBuf),
    S3 { bucket: String, prefix: String },
    Cache(Box<PodUri>, Box<PodUri>),
}

impl PodUri {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with('[') {
            let list: Vec<String> =
                serde_json::from_str(s).context("parsing pod uri chain as JSON list")?;
            return Self::chain(&list);
        }
        if let Some(idx) = s.find('+') {
            let fast = &s[..idx];
            let slow = &s[idx + 1..];
            return Ok(PodUri::Cache(
                Box::new(Self::parse(fast)?),
                Box::new(Self::parse(slow)?),
            ));
        }
        Self::parse_single(s)
    }

    fn chain(uris: &[String]) -> Result<Self> {
        let mut iter = uris.iter().rev();
        let mut current = Self::parse(
            iter.next()
                .ok_or_else(|| anyhow::anyhow!("empty pod uri chain"))?,
        )?;
        for s in iter {
            current = PodUri::Cache(Box::new(Self::parse(s)?), Box::new(current));
        }
        Ok(current)
    }

    fn parse_single(s: &str) -> Result<Self> {
        if s == "memory://" || s == "memory" {
            return Ok(PodUri::Memory);
        }
        if let Some(rest) = s.strip_prefix("file://") {
            return Ok(PodUri::File(PathBuf::from(rest)));
        }
        if let Some(rest) = s.strip_prefix("s3://") {
            let mut parts = rest.splitn(2, '/');
            let bucket = parts
                .next()
                .filter(|b| !b.is_empty())
                .ok_or_else(|| anyhow::anyhow!("s3 uri missing bucket: {}", s))?
                .to_string();
            let prefix = parts.next().unwrap_or("").to_string();
            return Ok(PodUri::S3 { bucket, prefix });
        }
        // A bare relative or absolute path (no "scheme://") names a
        // filesystem pod directly, e.g. "./local-store" or "/srv/lakota".
        if !s.contains("://") {
            return Ok(PodUri::File(PathBuf::from(s)));
        }
        bail!("unrecognized pod uri: {}", s);
    }

    /// Wrap `self` in whatever `LAKOTA_CACHE` names as a fast tier, if
    /// the environment variable is set.
    pub fn with_env_cache(self) -> Result<Self> {
        match std::env::var(CACHE_ENV_VAR) {
            Ok(cache_uri) if !cache_uri.is_empty() => {
                Ok(PodUri::Cache(Box::new(Self::parse(&cache_uri)?), Box::new(self)))
            }
            _ => Ok(self),
        }
    }

    fn build(&self) -> Result<Box<dyn Pod>> {
        Ok(match self {
            PodUri::Memory => Box::new(MemoryPod::new()),
            PodUri::File(path) => Box::new(FilesystemPod::new(path.clone())),
            PodUri::S3 { bucket, prefix } => Box::new(S3Pod::connect(bucket.clone(), prefix.clone())?),
            PodUri::Cache(fast, slow) => Box::new(CachePod::new(fast.build()?, slow.build()?)),
        })
    }

    pub fn open(&self) -> Result<PodRef> {
        Ok(Arc::from(self.build()?))
    }
}
