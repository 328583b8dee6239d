//! Conversion between vector streams and single record streams.

use crate::keypoint::KeypointRecord;

/// Unpacks a vector stream into single records.
///
/// Valid entries are written in order. The first vector without a valid entry ends the
/// stream, as does the end of `vectors`; the result is then closed with the sentinel if it
/// holds fewer than `max_output` records.
pub fn deserialize(
    vectors: &[KeypointRecord],
    vector_width: usize,
    max_output: usize,
) -> Vec<KeypointRecord> {
    let mut out = Vec::new();
    for vector in vectors.chunks(vector_width.max(1)) {
        if !vector.iter().any(KeypointRecord::is_valid) {
            break;
        }
        for record in vector.iter().filter(|kp| kp.is_valid()) {
            if out.len() == max_output {
                return out;
            }
            out.push(*record);
        }
    }
    if out.len() < max_output {
        out.push(KeypointRecord::SENTINEL);
    }
    out
}

/// Packs the valid records before the first sentinel into vectors of `vector_width`,
/// padding the last one. At most `max_vectors` vectors are written, the terminating
/// all-sentinel vector included when there is room for it.
pub fn serialize(
    records: &[KeypointRecord],
    vector_width: usize,
    max_vectors: usize,
) -> Vec<KeypointRecord> {
    let width = vector_width.max(1);
    let valid: Vec<_> = records
        .iter()
        .take_while(|kp| !kp.is_sentinel())
        .filter(|kp| kp.is_valid())
        .copied()
        .collect();
    let mut out = Vec::with_capacity((valid.len() / width + 1) * width);
    for chunk in valid.chunks(width).take(max_vectors) {
        out.extend_from_slice(chunk);
        out.resize(out.len() + width - chunk.len(), KeypointRecord::SENTINEL);
    }
    if out.len() / width < max_vectors {
        out.resize(out.len() + width, KeypointRecord::SENTINEL);
    }
    out
}
