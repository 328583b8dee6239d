//! Concatenation of several single record streams, e.g. the survivors of every pyramid level.

use crate::keypoint::KeypointRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatherMode {
    /// Each input in turn, until it ends.
    #[default]
    Block,
    /// One record from every active input per round.
    Cyclic,
}

/// An input ends at its sentinel or after `limit` records.
#[derive(Debug, Clone, Copy)]
pub struct GatherInput<'a> {
    pub records: &'a [KeypointRecord],
    pub limit: usize,
}

impl<'a> GatherInput<'a> {
    pub fn new(records: &'a [KeypointRecord], limit: usize) -> Self {
        Self { records, limit }
    }

    fn iter(&self) -> impl Iterator<Item = KeypointRecord> + 'a {
        self.records
            .iter()
            .take(self.limit)
            .take_while(|kp| !kp.is_sentinel())
            .copied()
    }
}

/// Collects at most `max_output` records, followed by the sentinel if there is room.
pub fn gather(inputs: &[GatherInput], mode: GatherMode, max_output: usize) -> Vec<KeypointRecord> {
    let mut out = Vec::new();
    match mode {
        GatherMode::Block => {
            out.extend(inputs.iter().flat_map(GatherInput::iter).take(max_output));
        }
        GatherMode::Cyclic => {
            let mut active: Vec<_> = inputs.iter().map(GatherInput::iter).collect();
            'rounds: while !active.is_empty() {
                let mut index = 0;
                while index < active.len() {
                    if out.len() == max_output {
                        break 'rounds;
                    }
                    match active[index].next() {
                        Some(record) => {
                            out.push(record);
                            index += 1;
                        }
                        None => {
                            active.remove(index);
                        }
                    }
                }
            }
        }
    }
    if out.len() < max_output {
        out.push(KeypointRecord::SENTINEL);
    }
    out
}
