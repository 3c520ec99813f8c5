//! Segment: the persistent, content-addressed form of a frame.
//!
//! A segment is one blob per column plus a manifest blob binding column
//! names to their digests. Column blobs are themselves content-addressed,
//! so two segments that happen to share a column's bytes (e.g. an
//! unchanged index column across successive writes) share storage for it
//! too.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::digest::Digest;
use crate::frame::Frame;
use crate::pod::Pod;
use crate::schema::Schema;

const BLOB_PREFIX: &str = "blobs";
const SEGMENT_PREFIX: &str = "segments";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnManifest {
    pub name: String,
    pub digest: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentManifest {
    pub columns: Vec<ColumnManifest>,
}

/// Encode every column of `frame`, PUT each one plus the manifest, and
/// return the manifest's digest. Given identical input frames and schema
/// this always produces the same digest: encoding and manifest
/// serialization are both deterministic.
pub fn write_segment(frame: &Frame, pod: &dyn Pod, codec: &dyn Codec) -> Result<Digest> {
    let mut columns = Vec::with_capacity(frame.columns().len());
    for (col, array) in frame.schema().columns().iter().zip(frame.columns()) {
        let encoded = codec.encode(array).with_context(|| format!("encoding column '{}'", col.name))?;
        let digest = Digest::of(&encoded);
        pod.put(&digest.pod_key(BLOB_PREFIX), &encoded)?;
        columns.push(ColumnManifest {
            name: col.name.clone(),
            digest: digest.to_hex(),
            rows: array.len(),
        });
    }

    let manifest = SegmentManifest { columns };
    let manifest_bytes = serde_json::to_vec(&manifest).context("serializing segment manifest")?;
    let manifest_digest = Digest::of(&manifest_bytes);
    pod.put(&manifest_digest.pod_key(SEGMENT_PREFIX), &manifest_bytes)?;
    Ok(manifest_digest)
}

/// Load a segment, decoding only the columns in `columns_wanted` (index
/// columns are always included, since every caller needs them to place
/// rows) and optionally slicing to `row_range`.
pub fn read_segment(
    pod: &dyn Pod,
    codec: &dyn Codec,
    schema: &Schema,
    segment_digest: &Digest,
    columns_wanted: Option<&[&str]>,
    row_range: Option<(usize, usize)>,
) -> Result<Frame> {
    let manifest_bytes = pod.get_required(&segment_digest.pod_key(SEGMENT_PREFIX))?;
    let manifest: SegmentManifest =
        serde_json::from_slice(&manifest_bytes).context("decoding segment manifest")?;

    let selected: Vec<_> = schema
        .columns()
        .iter()
        .filter(|c| {
            c.is_index
                || columns_wanted
                    .map(|wanted| wanted.contains(&c.name.as_str()))
                    .unwrap_or(true)
        })
        .cloned()
        .collect();

    let mut arrays = Vec::with_capacity(selected.len());
    for col in &selected {
        let col_manifest = manifest
            .columns
            .iter()
            .find(|m| m.name == col.name)
            .ok_or_else(|| anyhow!("segment manifest missing column '{}'", col.name))?;
        let digest = Digest::from_hex(&col_manifest.digest)?;
        let encoded = pod.get_required(&digest.pod_key(BLOB_PREFIX))?;
        let mut array = codec
            .decode(col.ty, &encoded)
            .with_context(|| format!("decoding column '{}'", col.name))?;
        if let Some((start, end)) = row_range {
            array = array.slice(start, end);
        }
        arrays.push(array);
    }

    let projected_schema = Schema::new_unchecked(selected);
    Frame::new(projected_schema, arrays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ZstdCodec;
    use crate::frame::Array;
    use crate::pod::MemoryPod;
    use crate::schema::{Column, ColumnType};

    fn sample_frame() -> (Schema, Frame) {
        let schema = Schema::new(vec![
            Column::index("ts", ColumnType::Int64),
            Column::data("val", ColumnType::Float64),
            Column::data("label", ColumnType::Str),
        ])
        .unwrap();
        let frame = Frame::new(
            schema.clone(),
            vec![
                Array::Int64(vec![Some(1), Some(2), Some(3)]),
                Array::Float64(vec![Some(1.0), Some(2.0), Some(3.0)]),
                Array::Str(vec![Some("a".into()), None, Some("c".into())]),
            ],
        )
        .unwrap();
        (schema, frame)
    }

    #[test]
    fn write_then_read_round_trips_full_frame() {
        let (schema, frame) = sample_frame();
        let pod = MemoryPod::new();
        let codec = ZstdCodec;

        let digest = write_segment(&frame, &pod, &codec).unwrap();
        let read_back = read_segment(&pod, &codec, &schema, &digest, None, None).unwrap();

        assert_eq!(read_back.len(), 3);
        assert_eq!(read_back.column("label").unwrap().len(), 3);
    }

    #[test]
    fn column_projection_skips_undesired_blobs() {
        let (schema, frame) = sample_frame();
        let pod = MemoryPod::new();
        let codec = ZstdCodec;

        let digest = write_segment(&frame, &pod, &codec).unwrap();
        let read_back = read_segment(&pod, &codec, &schema, &digest, Some(&["val"]), None).unwrap();

        assert!(read_back.column("val").is_some());
        assert!(read_back.column("label").is_none());
        assert!(read_back.column("ts").is_some(), "index column always included");
    }

    #[test]
    fn row_range_slices_after_decode() {
        let (schema, frame) = sample_frame();
        let pod = MemoryPod::new();
        let codec = ZstdCodec;

        let digest = write_segment(&frame, &pod, &codec).unwrap();
        let read_back = read_segment(&pod, &codec, &schema, &digest, None, Some((1, 3))).unwrap();
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back.index_key(0).unwrap(), frame.index_key(1).unwrap());
    }

    #[test]
    fn identical_frames_produce_identical_digests() {
        let (_schema, frame) = sample_frame();
        let pod = MemoryPod::new();
        let codec = ZstdCodec;
        let d1 = write_segment(&frame, &pod, &codec).unwrap();
        let d2 = write_segment(&frame, &pod, &codec).unwrap();
        assert_eq!(d1, d2);
    }
}
