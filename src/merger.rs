//! Interleaving of the current, previous and next level streams in scan order.

use std::fmt;
use std::slice::Chunks;

use itertools::Itertools;

use crate::error::{Error, Result};
use crate::keypoint::KeypointRecord;
use crate::params::InputLimits;

/// Which pyramid level a stream was extracted from, relative to the level being filtered.
/// The declaration order is the tie-break priority of the merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum StreamOrigin {
    Current,
    Previous,
    Next,
}

impl StreamOrigin {
    pub const ALL: [StreamOrigin; 3] = [
        StreamOrigin::Current,
        StreamOrigin::Previous,
        StreamOrigin::Next,
    ];
}

impl fmt::Display for StreamOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamOrigin::Current => "current",
            StreamOrigin::Previous => "previous",
            StreamOrigin::Next => "next",
        };
        f.write_str(name)
    }
}

/// The three record streams handed to the engine. Each is a run of vectors of
/// `vector_width` records, padded with [`KeypointRecord::SENTINEL`] and ended by a vector
/// holding nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputStreams<'a> {
    pub current: &'a [KeypointRecord],
    pub previous: &'a [KeypointRecord],
    pub next: &'a [KeypointRecord],
}

impl<'a> InputStreams<'a> {
    pub fn current_only(current: &'a [KeypointRecord]) -> Self {
        Self {
            current,
            ..Self::default()
        }
    }

    pub fn get(&self, origin: StreamOrigin) -> &'a [KeypointRecord] {
        match origin {
            StreamOrigin::Current => self.current,
            StreamOrigin::Previous => self.previous,
            StreamOrigin::Next => self.next,
        }
    }

    /// Checks every record a merger with these limits would read.
    pub fn validate(&self, limits: &InputLimits, vector_width: usize) -> Result<()> {
        for origin in StreamOrigin::ALL {
            let mut cursor =
                InputCursor::new(origin, self.get(origin), vector_width, limits.get(origin));
            let mut index = 0;
            while let Some(vector) = cursor.advance() {
                if let Some(offset) = vector.iter().position(KeypointRecord::is_malformed) {
                    return Err(Error::MalformedRecord {
                        stream: origin,
                        index: index + offset,
                    });
                }
                index += vector.len();
            }
        }
        Ok(())
    }
}

/// Read position in one input.
#[derive(Debug, Clone)]
struct InputCursor<'a> {
    origin: StreamOrigin,
    vectors: Chunks<'a, KeypointRecord>,
    head: Option<&'a [KeypointRecord]>,
    remaining: u32,
}

impl<'a> InputCursor<'a> {
    fn new(
        origin: StreamOrigin,
        records: &'a [KeypointRecord],
        vector_width: usize,
        limit: u32,
    ) -> Self {
        let mut cursor = Self {
            origin,
            vectors: records.chunks(vector_width.max(1)),
            head: None,
            remaining: limit,
        };
        cursor.load_head();
        cursor
    }

    fn load_head(&mut self) {
        self.head = if self.remaining == 0 {
            None
        } else {
            self.vectors
                .next()
                .filter(|vector| vector.iter().any(|kp| !kp.is_sentinel()))
        };
        if self.head.is_none() {
            self.remaining = 0;
        }
    }

    /// First record of the head vector in scan order, `None` once exhausted.
    fn head_record(&self) -> Option<&'a KeypointRecord> {
        self.head?
            .iter()
            .filter(|kp| !kp.is_sentinel())
            .min_by_key(|kp| kp.scan_key())
    }

    fn advance(&mut self) -> Option<&'a [KeypointRecord]> {
        let vector = self.head.take()?;
        self.remaining -= 1;
        self.load_head();
        Some(vector)
    }
}

/// Hands out the input vectors of all three streams in order of their row. On equal rows
/// the current level goes first, then the previous, then the next level.
#[derive(Debug, Clone)]
pub struct StreamMerger<'a> {
    cursors: [InputCursor<'a>; 3],
    last_origin: Option<StreamOrigin>,
}

impl<'a> StreamMerger<'a> {
    pub fn new(streams: InputStreams<'a>, limits: &InputLimits, vector_width: usize) -> Self {
        let cursors = StreamOrigin::ALL.map(|origin| {
            InputCursor::new(origin, streams.get(origin), vector_width, limits.get(origin))
        });
        Self {
            cursors,
            last_origin: None,
        }
    }

    /// Stream that supplied the vector returned last.
    pub fn last_origin(&self) -> Option<StreamOrigin> {
        self.last_origin
    }
}

impl Iterator for StreamMerger<'_> {
    /// A vector with the sentinel padding removed.
    type Item = Vec<KeypointRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        // min_by keeps the first of equal rows, which is the priority order.
        let cursor = self
            .cursors
            .iter_mut()
            .filter_map(|cursor| cursor.head_record().map(|head| (head, cursor)))
            .min_by(|(a, _), (b, _)| a.row_order(b))
            .map(|(_, cursor)| cursor)?;
        self.last_origin = Some(cursor.origin);
        let vector = cursor.advance()?;
        Some(
            vector
                .iter()
                .filter(|kp| !kp.is_sentinel())
                .copied()
                .collect_vec(),
        )
    }
}
