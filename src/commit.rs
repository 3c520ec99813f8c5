//! Commit: one rectangular (start, stop) slab of a series' index range.
//!
//! A commit is either backed by a full `Segment` (for large writes) or
//! carries its rows embedded directly in the commit blob, skipping the
//! manifest/column-blob indirection for small frames. Overlap
//! classification is exposed here; resolving overlaps across many
//! commits is `Series::read`'s job, not this module's.

use std::io::Read;

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::Codec;
use crate::digest::{Digest, DIGEST_SIZE};
use crate::error::LakotaError;
use crate::frame::{Array, Frame, IndexKey, IndexValue};
use crate::pod::Pod;
use crate::range::Interval;
use crate::schema::Schema;
use crate::segment::{read_segment, write_segment};

/// Rows at or below this count are embedded directly in the commit blob
/// rather than written out as a separate segment.
pub const DEFAULT_EMBED_THRESHOLD: usize = 1024;

const VERSION: u8 = 1;
const BODY_SEGMENT: u8 = 0;
const BODY_EMBEDDED: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum CommitBody {
    Segment(Digest),
    Embedded(Vec<u8>),
}

/// How a query range relates to a commit's (start, stop) range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    Disjoint,
    /// The commit's whole range lies inside the query range.
    Contained,
    /// The query range lies entirely inside the commit's range.
    Contains,
    Equal,
    OverlapLeft,
    OverlapRight,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub start: IndexKey,
    pub stop: IndexKey,
    pub row_count: usize,
    pub body: CommitBody,
}

impl Commit {
    /// Build a commit out of `frame`, writing a segment unless the frame
    /// is small enough to embed. `frame` must already be sorted and
    /// deduplicated by index key (`Series::write` is responsible for
    /// that, not this function).
    pub fn build(
        frame: &Frame,
        pod: &dyn Pod,
        codec: &dyn Codec,
        embed_threshold: usize,
    ) -> Result<Self> {
        if frame.is_empty() {
            bail!(LakotaError::EmptyWrite);
        }
        let start = frame.first_key()?.expect("non-empty frame has a first key");
        let stop = frame.last_key()?.expect("non-empty frame has a last key");
        let row_count = frame.len();

        let body = if row_count <= embed_threshold {
            CommitBody::Embedded(encode_embedded(frame, codec)?)
        } else {
            CommitBody::Segment(write_segment(frame, pod, codec)?)
        };

        Ok(Commit {
            start,
            stop,
            row_count,
            body,
        })
    }

    pub fn interval(&self) -> Interval<IndexKey> {
        Interval::closed(self.start.clone(), self.stop.clone())
    }

    pub fn classify(&self, query: &Interval<IndexKey>) -> Overlap {
        let commit = self.interval();
        let overlap = match commit.intersect(query) {
            None => return Overlap::Disjoint,
            Some(ov) => ov,
        };
        let commit_fully_covered = overlap.lo == commit.lo && overlap.hi == commit.hi;
        let query_fully_covered = overlap.lo == query.lo && overlap.hi == query.hi;
        match (commit_fully_covered, query_fully_covered) {
            (true, true) => Overlap::Equal,
            (true, false) => Overlap::Contained,
            (false, true) => Overlap::Contains,
            (false, false) => {
                if overlap.lo == commit.lo {
                    Overlap::OverlapRight
                } else {
                    Overlap::OverlapLeft
                }
            }
        }
    }

    /// Load just the rows whose index key falls in `sub_range`.
    pub fn slice(
        &self,
        sub_range: &Interval<IndexKey>,
        pod: &dyn Pod,
        codec: &dyn Codec,
        schema: &Schema,
    ) -> Result<Frame> {
        match &self.body {
            CommitBody::Embedded(bytes) => {
                let frame = decode_embedded(schema, bytes, codec)?;
                let (start, end) = row_bounds(&frame, sub_range)?;
                Ok(frame.slice_rows(start, end))
            }
            CommitBody::Segment(digest) => {
                let index_only = read_segment(pod, codec, schema, digest, Some(&[]), None)?;
                let (start, end) = row_bounds(&index_only, sub_range)?;
                read_segment(pod, codec, schema, digest, None, Some((start, end)))
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u8(VERSION)?;

        let start_bytes = encode_index_key(&self.start);
        out.write_u32::<LittleEndian>(start_bytes.len() as u32)?;
        out.extend_from_slice(&start_bytes);

        let stop_bytes = encode_index_key(&self.stop);
        out.write_u32::<LittleEndian>(stop_bytes.len() as u32)?;
        out.extend_from_slice(&stop_bytes);

        out.write_u64::<LittleEndian>(self.row_count as u64)?;

        match &self.body {
            CommitBody::Segment(digest) => {
                out.write_u8(BODY_SEGMENT)?;
                out.extend_from_slice(digest.as_bytes());
            }
            CommitBody::Embedded(bytes) => {
                out.write_u8(BODY_EMBEDDED)?;
                out.write_u32::<LittleEndian>(bytes.len() as u32)?;
                out.extend_from_slice(bytes);
            }
        }
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = data;
        let version = cursor.read_u8()?;
        if version != VERSION {
            bail!("unsupported commit blob version {}", version);
        }

        let start_len = cursor.read_u32::<LittleEndian>()? as usize;
        let (start_bytes, rest) = split_at(cursor, start_len)?;
        cursor = rest;
        let start = decode_index_key(start_bytes)?;

        let stop_len = cursor.read_u32::<LittleEndian>()? as usize;
        let (stop_bytes, rest) = split_at(cursor, stop_len)?;
        cursor = rest;
        let stop = decode_index_key(stop_bytes)?;

        let row_count = cursor.read_u64::<LittleEndian>()? as usize;
        let flag = cursor.read_u8()?;
        let body = match flag {
            BODY_SEGMENT => {
                let mut digest_bytes = [0u8; DIGEST_SIZE];
                cursor.read_exact(&mut digest_bytes)?;
                CommitBody::Segment(Digest::from_bytes(digest_bytes))
            }
            BODY_EMBEDDED => {
                let len = cursor.read_u32::<LittleEndian>()? as usize;
                let mut buf = vec![0u8; len];
                cursor.read_exact(&mut buf)?;
                CommitBody::Embedded(buf)
            }
            other => bail!("unknown commit body flag {}", other),
        };

        Ok(Commit {
            start,
            stop,
            row_count,
            body,
        })
    }
}

fn split_at(data: &[u8], at: usize) -> Result<(&[u8], &[u8])> {
    if at > data.len() {
        bail!("truncated commit blob");
    }
    Ok(data.split_at(at))
}

/// Tagged little-endian encoding of an index key, one value after another.
/// Self-describing (each value carries its own type tag) so decoding
/// doesn't need the schema at hand.
fn encode_index_key(key: &IndexKey) -> Vec<u8> {
    let mut out = Vec::new();
    for value in key {
        match value {
            IndexValue::Int64(v) => {
                out.write_u8(0).unwrap();
                out.write_i64::<LittleEndian>(*v).unwrap();
            }
            IndexValue::Float64(v) => {
                out.write_u8(1).unwrap();
                out.write_f64::<LittleEndian>(*v).unwrap();
            }
            IndexValue::Str(v) => {
                out.write_u8(2).unwrap();
                out.write_u32::<LittleEndian>(v.len() as u32).unwrap();
                out.extend_from_slice(v.as_bytes());
            }
            IndexValue::Bool(v) => {
                out.write_u8(3).unwrap();
                out.write_u8(*v as u8).unwrap();
            }
            IndexValue::Timestamp(v) => {
                out.write_u8(4).unwrap();
                out.write_i64::<LittleEndian>(*v).unwrap();
            }
            IndexValue::Date(v) => {
                out.write_u8(5).unwrap();
                out.write_i64::<LittleEndian>(*v).unwrap();
            }
            IndexValue::Bytes(v) => {
                out.write_u8(6).unwrap();
                out.write_u32::<LittleEndian>(v.len() as u32).unwrap();
                out.extend_from_slice(v);
            }
        }
    }
    out
}

fn decode_index_key(mut data: &[u8]) -> Result<IndexKey> {
    let mut out = Vec::new();
    while !data.is_empty() {
        let tag = data.read_u8()?;
        let value = match tag {
            0 => IndexValue::Int64(data.read_i64::<LittleEndian>()?),
            1 => IndexValue::Float64(data.read_f64::<LittleEndian>()?),
            2 => {
                let len = data.read_u32::<LittleEndian>()? as usize;
                let mut buf = vec![0u8; len];
                data.read_exact(&mut buf)?;
                IndexValue::Str(String::from_utf8(buf)?)
            }
            3 => IndexValue::Bool(data.read_u8()? != 0),
            4 => IndexValue::Timestamp(data.read_i64::<LittleEndian>()?),
            5 => IndexValue::Date(data.read_i64::<LittleEndian>()?),
            6 => {
                let len = data.read_u32::<LittleEndian>()? as usize;
                let mut buf = vec![0u8; len];
                data.read_exact(&mut buf)?;
                IndexValue::Bytes(buf)
            }
            other => bail!("unknown index value tag {}", other),
        };
        out.push(value);
    }
    Ok(out)
}

fn encode_embedded(frame: &Frame, codec: &dyn Codec) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for array in frame.columns() {
        let encoded = codec.encode(array)?;
        out.write_u32::<LittleEndian>(encoded.len() as u32)?;
        out.extend_from_slice(&encoded);
    }
    Ok(out)
}

fn decode_embedded(schema: &Schema, mut data: &[u8], codec: &dyn Codec) -> Result<Frame> {
    let mut arrays: Vec<Array> = Vec::with_capacity(schema.columns().len());
    for col in schema.columns() {
        let len = data
            .read_u32::<LittleEndian>()
            .context("reading embedded column length")? as usize;
        let (chunk, rest) = split_at(data, len)?;
        data = rest;
        arrays.push(codec.decode(col.ty, chunk)?);
    }
    Frame::new(schema.clone(), arrays)
}

/// Translate a `Bound`-based sub-range into `[start, end)` row indices
/// within `frame`, via binary search over its (already sorted) index
/// keys.
pub(crate) fn row_bounds(frame: &Frame, sub_range: &Interval<IndexKey>) -> Result<(usize, usize)> {
    use crate::range::Bound;

    let start = match &sub_range.lo {
        Bound::NegInf => 0,
        Bound::Incl(k) => lower_bound(frame, k)?,
        Bound::Excl(k) => upper_bound(frame, k)?,
        Bound::PosInf => frame.len(),
    };
    let end = match &sub_range.hi {
        Bound::PosInf => frame.len(),
        Bound::Incl(k) => upper_bound(frame, k)?,
        Bound::Excl(k) => lower_bound(frame, k)?,
        Bound::NegInf => 0,
    };
    Ok((start, end.max(start)))
}

fn lower_bound(frame: &Frame, key: &IndexKey) -> Result<usize> {
    let mut lo = 0usize;
    let mut hi = frame.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if &frame.index_key(mid)? < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

fn upper_bound(frame: &Frame, key: &IndexKey) -> Result<usize> {
    let mut lo = 0usize;
    let mut hi = frame.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if &frame.index_key(mid)? <= key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ZstdCodec;
    use crate::pod::MemoryPod;
    use crate::schema::{Column, ColumnType};

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

    #[test]
    fn embeds_small_frames() {
        let pod = MemoryPod::new();
        let codec = ZstdCodec;
        let frame = frame_of(&[(1, 1.0), (2, 2.0)]);
        let commit = Commit::build(&frame, &pod, &codec, DEFAULT_EMBED_THRESHOLD).unwrap();
        assert!(matches!(commit.body, CommitBody::Embedded(_)));
    }

    #[test]
    fn segments_large_frames() {
        let pod = MemoryPod::new();
        let codec = ZstdCodec;
        let frame = frame_of(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        let commit = Commit::build(&frame, &pod, &codec, 1).unwrap();
        assert!(matches!(commit.body, CommitBody::Segment(_)));
    }

    #[test]
    fn index_key_round_trips_date_and_bytes_values() {
        let key = vec![IndexValue::Date(19_000), IndexValue::Bytes(vec![9, 8, 7])];
        let encoded = encode_index_key(&key);
        let decoded = decode_index_key(&encoded).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn commit_bytes_round_trip() {
        let pod = MemoryPod::new();
        let codec = ZstdCodec;
        let frame = frame_of(&[(1, 1.0), (2, 2.0)]);
        let commit = Commit::build(&frame, &pod, &codec, DEFAULT_EMBED_THRESHOLD).unwrap();
        let bytes = commit.to_bytes().unwrap();
        let decoded = Commit::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, commit);
    }

    #[test]
    fn classify_detects_disjoint_and_contains() {
        let pod = MemoryPod::new();
        let codec = ZstdCodec;
        let frame = frame_of(&[(10, 1.0), (20, 2.0)]);
        let commit = Commit::build(&frame, &pod, &codec, DEFAULT_EMBED_THRESHOLD).unwrap();

        let far = Interval::closed(vec![IndexValue::Int64(100)], vec![IndexValue::Int64(200)]);
        assert_eq!(commit.classify(&far), Overlap::Disjoint);

        let wide = Interval::closed(vec![IndexValue::Int64(0)], vec![IndexValue::Int64(1000)]);
        assert_eq!(commit.classify(&wide), Overlap::Contained);

        let narrow = Interval::closed(vec![IndexValue::Int64(15)], vec![IndexValue::Int64(16)]);
        assert_eq!(commit.classify(&narrow), Overlap::Disjoint);
    }

    #[test]
    fn slice_returns_requested_rows() {
        let pod = MemoryPod::new();
        let codec = ZstdCodec;
        let frame = frame_of(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]);
        let commit = Commit::build(&frame, &pod, &codec, DEFAULT_EMBED_THRESHOLD).unwrap();

        let sub = Interval::closed(vec![IndexValue::Int64(2)], vec![IndexValue::Int64(3)]);
        let sliced = commit.slice(&sub, &pod, &codec, &schema()).unwrap();
        assert_eq!(sliced.len(), 2);
        assert_eq!(sliced.index_key(0).unwrap(), vec![IndexValue::Int64(2)]);
    }
}
