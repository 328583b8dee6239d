//! The streaming deduplication engine.
//!
//! Every input vector passes through one comparison cycle. The step that reads the vector
//! also compares its entries with each other. From then on every lane hands out one
//! resident record per step, newest first, until the vector has met every resident. The
//! vector's records are then written to their lanes, one per step. A step retires at most
//! one record: the oldest once the scan has moved more than a radius past it, or the one a
//! full lane gives up for a write.
//!
//! Memory is bounded by the [`CapacityPlan`], the number of steps by
//! [`CapacityPlan::step_limit`].

use itertools::Itertools;
use log::{debug, trace, warn};

use crate::dual_buffer::DualBuffer;
use crate::error::{Error, Result};
use crate::keypoint::KeypointRecord;
use crate::merger::{InputStreams, StreamMerger};
use crate::params::{CapacityPlan, DedupParams};
use crate::policy::{AkazePolicy, ComparePolicy};
use crate::prefetch::PrefetchWindow;
use crate::ring_buffer::RingBuffer;
use crate::sink::OutputSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum EngineState {
    /// Prefetch windows are not yet primed.
    Filling,
    Steady,
    /// Input exhausted, buffered records are retired one per step.
    Draining,
    Done,
}

/// Counters of one run.
///
/// A run that ends through draining satisfies
/// `emitted + truncated + suppressed + discarded == records_read`. Runs stopped by the output
/// or iteration limit count what was still buffered or waiting to be written in `abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct DedupStats {
    pub steps: u64,
    pub records_read: u64,
    pub emitted: u64,
    /// Survivors dropped because the output was full.
    pub truncated: u64,
    pub suppressed: u64,
    /// Records of other levels or inside the border margin.
    pub discarded: u64,
    pub abandoned: u64,
    /// Records pushed out of a full lane while still inside the search radius.
    pub overflow_evictions: u64,
    pub iteration_limit_hit: bool,
}

impl DedupStats {
    pub fn survivors(&self) -> u64 {
        self.emitted + self.truncated
    }

    pub fn invalidated(&self) -> u64 {
        self.suppressed + self.discarded
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutput {
    /// Survivors in scan order, followed by the sentinel if there was room for it.
    pub records: Vec<KeypointRecord>,
    pub stats: DedupStats,
}

impl DedupOutput {
    pub fn survivors(&self) -> &[KeypointRecord] {
        match self.records.split_last() {
            Some((last, rest)) if last.is_sentinel() => rest,
            _ => &self.records,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Live,
    /// Never emitted, still suppresses its neighbours.
    Discarded,
    /// Lost a comparison. Takes no further part.
    Suppressed,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    record: KeypointRecord,
    /// Position in the merged input.
    seq: u64,
    fate: Fate,
}

impl Slot {
    fn competes(&self) -> bool {
        self.fate != Fate::Suppressed
    }

    fn suppress(&mut self) {
        self.record.invalidate();
        self.fate = Fate::Suppressed;
    }
}

/// One prefetch window in front of one ring. Holds every record whose sequence number is
/// congruent to the lane index, oldest first in the ring and newest in the window.
#[derive(Debug, Clone)]
struct Lane {
    prefetch: PrefetchWindow<Slot>,
    ring: RingBuffer<Slot>,
}

impl Lane {
    fn new(plan: &CapacityPlan) -> Self {
        Self {
            prefetch: PrefetchWindow::new(plan.prefetch_depth),
            ring: RingBuffer::new(plan.lane_capacity),
        }
    }

    fn len(&self) -> usize {
        self.ring.fill_level() + self.prefetch.len()
    }

    fn is_full(&self) -> bool {
        self.prefetch.is_primed() && self.ring.is_full()
    }

    /// Resident `index`, counted from the oldest.
    fn get(&self, index: usize) -> Option<&Slot> {
        let committed = self.ring.fill_level();
        if index < committed {
            self.ring.get(index)
        } else {
            self.prefetch.get(index - committed)
        }
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut Slot> {
        let committed = self.ring.fill_level();
        if index < committed {
            self.ring.get_mut(index)
        } else {
            self.prefetch.get_mut(index - committed)
        }
    }

    fn oldest(&self) -> Option<&Slot> {
        self.ring.front().or_else(|| self.prefetch.oldest())
    }

    fn pop_oldest(&mut self) -> Option<Slot> {
        self.ring.pop_front().or_else(|| self.prefetch.take_oldest())
    }

    /// Only called on a lane that is not full, so the ring never has to evict.
    fn write(&mut self, slot: Slot) {
        if let Some(committed) = self.prefetch.shift(slot) {
            let evicted = self.ring.push(committed);
            debug_assert!(evicted.is_none(), "write into a full lane");
        }
    }
}

/// The vector being compared and then written.
#[derive(Debug, Clone)]
struct Cycle {
    incoming: Vec<Slot>,
    /// Incoming records that lost a comparison. Applied once the vector has met every
    /// resident, so a loser keeps suppressing for the rest of its cycle.
    doomed: Vec<bool>,
    /// Per lane, residents `0..cursor` have not met the vector yet. Read from the top.
    cursors: Vec<usize>,
    settled: bool,
    written: usize,
}

impl Cycle {
    fn is_compared(&self) -> bool {
        self.cursors.iter().all(|&cursor| cursor == 0)
    }

    fn is_written(&self) -> bool {
        self.written == self.incoming.len()
    }

    fn pending(&self) -> u64 {
        (self.incoming.len() - self.written) as u64
    }

    fn settle(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        for (slot, &doomed) in self.incoming.iter_mut().zip(&self.doomed) {
            if doomed {
                slot.suppress();
            }
        }
    }
}

pub struct DedupEngine<'a, P = AkazePolicy> {
    policy: P,
    plan: CapacityPlan,
    merger: StreamMerger<'a>,
    lanes: Vec<Lane>,
    sink: OutputSink,
    cycle: Option<Cycle>,
    /// First record in scan order of the vector read last.
    frontier: Option<KeypointRecord>,
    /// Sequence numbers of the residents that lost a comparison, published at the end of the
    /// comparison phase of a step.
    losers: DualBuffer<Vec<u64>>,
    /// Residents the lanes handed out this step, as `(lane, index)`.
    round: Vec<(usize, usize)>,
    state: EngineState,
    next_seq: u64,
    /// Buffered records are exactly the sequence numbers in `oldest_seq..resident_end`.
    oldest_seq: u64,
    resident_end: u64,
    stats: DedupStats,
}

impl<'a> DedupEngine<'a, AkazePolicy> {
    pub fn new(params: &DedupParams, streams: InputStreams<'a>) -> Result<Self> {
        Self::with_policy(params, streams, AkazePolicy::new(params))
    }
}

impl<'a, P: ComparePolicy> DedupEngine<'a, P> {
    /// Validates the parameters and every input record the limits admit, and checks that
    /// the lanes can hold every record that is still in reach of a later one.
    pub fn with_policy(params: &DedupParams, streams: InputStreams<'a>, policy: P) -> Result<Self> {
        let plan = params.plan()?;
        streams.validate(&params.limits, params.vector_width)?;
        let merger = StreamMerger::new(streams, &params.limits, params.vector_width);

        let required = peak_residency(merger.clone(), &policy);
        let available = plan.resident_capacity();
        if required > available {
            return Err(Error::CapacityTooSmall {
                required: u32::try_from(required).unwrap_or(u32::MAX),
                configured: u32::try_from(available).unwrap_or(u32::MAX),
            });
        }
        debug!("dedup input needs {required} of {available} buffer slots");

        let lanes = (0..params.lane_count)
            .map(|_| Lane::new(&plan))
            .collect_vec();
        Ok(Self {
            policy,
            plan,
            merger,
            lanes,
            sink: OutputSink::new(params.max_output as usize),
            cycle: None,
            frontier: None,
            losers: DualBuffer::default(),
            round: Vec::with_capacity(params.lane_count),
            state: EngineState::Filling,
            next_seq: 0,
            oldest_seq: 0,
            resident_end: 0,
            stats: DedupStats::default(),
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> &DedupStats {
        &self.stats
    }

    pub fn plan(&self) -> &CapacityPlan {
        &self.plan
    }

    pub fn run(mut self) -> DedupOutput {
        while self.step() != EngineState::Done {}
        self.into_output()
    }

    /// Output so far. Only sentinel terminated once the engine is done.
    pub fn into_output(self) -> DedupOutput {
        DedupOutput {
            records: self.sink.into_records(),
            stats: self.stats,
        }
    }

    /// Advances the engine by one step. A step reads at most one input vector, compares one
    /// resident per lane, writes at most one record and emits at most one record.
    pub fn step(&mut self) -> EngineState {
        if self.state == EngineState::Done {
            return self.state;
        }
        if self.stats.steps >= self.plan.step_limit {
            warn!(
                "dedup stopped at the step limit of {} with {} records buffered",
                self.plan.step_limit,
                self.resident_count()
            );
            self.stats.iteration_limit_hit = true;
            self.finish();
            return self.state;
        }
        self.stats.steps += 1;

        match self.state {
            EngineState::Filling | EngineState::Steady => self.advance(),
            EngineState::Draining => match self.pop_oldest() {
                Some(slot) => self.retire(slot),
                None => {
                    self.sink.emit_sentinel();
                    self.transition(EngineState::Done);
                }
            },
            EngineState::Done => {}
        }

        if self.sink.is_full() && self.state != EngineState::Done {
            debug!("dedup output full after {} records", self.stats.emitted);
            self.finish();
        }
        self.state
    }

    fn transition(&mut self, to: EngineState) {
        trace!("dedup {:?} -> {:?} at step {}", self.state, to, self.stats.steps);
        self.state = to;
        if to == EngineState::Done {
            let s = &self.stats;
            debug!(
                "dedup done in {} steps: {} read, {} emitted, {} suppressed, {} discarded",
                s.steps, s.records_read, s.emitted, s.suppressed, s.discarded
            );
        }
    }

    /// Stops early. Whatever is still buffered or waiting to be written is abandoned.
    fn finish(&mut self) {
        self.stats.abandoned += self.resident_count();
        if let Some(cycle) = self.cycle.take() {
            self.stats.abandoned += cycle.pending();
        }
        self.sink.emit_sentinel();
        self.transition(EngineState::Done);
    }

    fn advance(&mut self) {
        let mut cycle = match self.cycle.take() {
            Some(cycle) => cycle,
            None => match self.merger.next() {
                Some(vector) => self.open_cycle(vector),
                None => {
                    self.transition(EngineState::Draining);
                    return;
                }
            },
        };

        if !cycle.is_compared() {
            self.compare_round(&mut cycle);
        }
        let mut retired = false;
        if cycle.is_compared() {
            cycle.settle();
            retired = self.write_next(&mut cycle);
            if self.state == EngineState::Filling
                && self.lanes.iter().all(|lane| lane.prefetch.is_primed())
            {
                self.transition(EngineState::Steady);
            }
        }
        if !retired {
            self.age_out(&mut cycle);
        }

        if !cycle.is_written() {
            self.cycle = Some(cycle);
        }
    }

    /// Admits `vector` and compares its records with each other.
    fn open_cycle(&mut self, vector: Vec<KeypointRecord>) -> Cycle {
        if let Some(front) = vector.iter().min_by_key(|kp| kp.scan_key()) {
            self.frontier = Some(*front);
        }
        let incoming = vector
            .into_iter()
            .map(|record| self.admit(record))
            .collect_vec();

        let mut doomed = vec![false; incoming.len()];
        for (i, j) in (0..incoming.len()).tuple_combinations() {
            let (earlier, later) = (&incoming[i].record, &incoming[j].record);
            if self.policy.conflicts(earlier, later) {
                let (keep_earlier, keep_later) = self.policy.resolve(earlier, later);
                doomed[i] |= !keep_earlier;
                doomed[j] |= !keep_later;
            }
        }

        let cursors = self.lanes.iter().map(Lane::len).collect_vec();
        if let Some(origin) = self.merger.last_origin() {
            trace!(
                "dedup step {}: {} records from the {origin} stream against {} buffered",
                self.stats.steps,
                incoming.len(),
                self.resident_count()
            );
        }
        Cycle {
            incoming,
            doomed,
            cursors,
            settled: false,
            written: 0,
        }
    }

    fn admit(&mut self, mut record: KeypointRecord) -> Slot {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.records_read += 1;
        let fate = if self.policy.should_discard(&record) {
            record.invalidate();
            Fate::Discarded
        } else {
            Fate::Live
        };
        Slot { record, seq, fate }
    }

    /// Every lane hands out its next resident to be compared with the incoming records.
    /// Losers among the residents are collected into the back bank and applied after the
    /// flip, so every comparison of the step sees the state from before it.
    fn compare_round(&mut self, cycle: &mut Cycle) {
        let policy = &self.policy;
        let losers = self.losers.back_mut();
        losers.clear();
        self.round.clear();

        for (lane_index, lane) in self.lanes.iter().enumerate() {
            let Some(index) = cycle.cursors[lane_index].checked_sub(1) else {
                continue;
            };
            cycle.cursors[lane_index] = index;
            let Some(candidate) = lane.get(index) else {
                continue;
            };
            self.round.push((lane_index, index));
            if !candidate.competes() {
                continue;
            }
            for (slot, doomed) in cycle.incoming.iter().zip(cycle.doomed.iter_mut()) {
                if policy.beyond_reach(&candidate.record, &slot.record)
                    || !policy.conflicts(&candidate.record, &slot.record)
                {
                    continue;
                }
                let (keep_candidate, keep_incoming) =
                    policy.resolve(&candidate.record, &slot.record);
                if !keep_candidate {
                    losers.push(candidate.seq);
                }
                *doomed |= !keep_incoming;
            }
        }

        self.losers.flip();
        let losers = self.losers.front();
        for &(lane, index) in &self.round {
            if let Some(slot) = self.lanes[lane].get_mut(index) {
                if losers.contains(&slot.seq) {
                    slot.suppress();
                }
            }
        }
    }

    /// Writes the next record of a settled cycle. A full lane first gives up the oldest
    /// buffered record. Returns true if that happened.
    fn write_next(&mut self, cycle: &mut Cycle) -> bool {
        let Some(&slot) = cycle.incoming.get(cycle.written) else {
            return false;
        };
        let lane = self.lane_of(slot.seq);
        let mut retired = false;
        if self.lanes[lane].is_full() {
            if let Some(victim) = self.pop_oldest() {
                if !self.beyond_frontier(&victim) {
                    self.stats.overflow_evictions += 1;
                    warn!(
                        "dedup buffer full: record at ({}, {}) evicted while still in reach",
                        victim.record.x, victim.record.y
                    );
                }
                self.retire(victim);
                retired = true;
            }
            if self.lanes[lane].is_full() {
                return retired;
            }
        }

        debug_assert_eq!(slot.seq, self.resident_end);
        self.lanes[lane].write(slot);
        self.resident_end += 1;
        cycle.written += 1;
        retired
    }

    /// Retires the oldest buffered record if no later record can reach it.
    fn age_out(&mut self, cycle: &mut Cycle) {
        let expired = self
            .oldest()
            .is_some_and(|oldest| self.beyond_frontier(oldest));
        if !expired {
            return;
        }
        if let Some(slot) = self.pop_oldest() {
            // the lane's residents moved down by one
            let lane = self.lane_of(slot.seq);
            cycle.cursors[lane] = cycle.cursors[lane].saturating_sub(1);
            self.retire(slot);
        }
    }

    fn beyond_frontier(&self, slot: &Slot) -> bool {
        self.frontier
            .is_some_and(|front| self.policy.beyond_reach(&slot.record, &front))
    }

    fn retire(&mut self, slot: Slot) {
        match slot.fate {
            Fate::Suppressed => self.stats.suppressed += 1,
            Fate::Discarded => self.stats.discarded += 1,
            Fate::Live => {
                if self.sink.emit(slot.record) {
                    self.stats.emitted += 1;
                } else {
                    self.stats.truncated += 1;
                }
            }
        }
    }

    fn lane_of(&self, seq: u64) -> usize {
        (seq % self.lanes.len() as u64) as usize
    }

    fn resident_count(&self) -> u64 {
        self.resident_end - self.oldest_seq
    }

    fn oldest(&self) -> Option<&Slot> {
        if self.oldest_seq == self.resident_end {
            return None;
        }
        self.lanes[self.lane_of(self.oldest_seq)].oldest()
    }

    fn pop_oldest(&mut self) -> Option<Slot> {
        if self.oldest_seq == self.resident_end {
            return None;
        }
        let lane = self.lane_of(self.oldest_seq);
        let slot = self.lanes[lane].pop_oldest()?;
        debug_assert_eq!(slot.seq, self.oldest_seq);
        self.oldest_seq += 1;
        Some(slot)
    }
}

/// Largest number of records the lanes have to hold for this input: everything from the
/// oldest record still in reach of a vector up to that vector's last record. Forced
/// evictions take the oldest record first, so this span must fit.
fn peak_residency<P: ComparePolicy>(merger: StreamMerger<'_>, policy: &P) -> usize {
    let mut seen: Vec<KeypointRecord> = Vec::new();
    let mut oldest = 0;
    let mut peak = 0;
    for vector in merger {
        if let Some(front) = vector.iter().min_by_key(|kp| kp.scan_key()) {
            while seen
                .get(oldest)
                .is_some_and(|kp| policy.beyond_reach(kp, front))
            {
                oldest += 1;
            }
        }
        seen.extend(vector);
        peak = peak.max(seen.len() - oldest);
    }
    peak
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::keypoint::radius_from_pixels;
    use crate::params::InputLimits;

    const S: KeypointRecord = KeypointRecord::SENTINEL;

    /// 64x64 image has 10 fraction bits.
    fn px(p: u16) -> u16 {
        p << 10
    }

    fn kp(x: u16, y: u16, response: u16) -> KeypointRecord {
        KeypointRecord::new(px(x), px(y), response, 0)
    }

    fn params() -> DedupParams {
        DedupParams {
            image_width: 64,
            image_height: 64,
            search_radius: radius_from_pixels(2),
            max_output: 100,
            limits: InputLimits {
                current: 100,
                previous: 100,
                next: 100,
            },
            ..DedupParams::default()
        }
    }

    fn run(params: &DedupParams, streams: InputStreams) -> DedupOutput {
        DedupEngine::new(params, streams).unwrap().run()
    }

    fn run_current(params: &DedupParams, current: &[KeypointRecord]) -> DedupOutput {
        run(params, InputStreams::current_only(current))
    }

    #[test]
    fn colocated_pair_keeps_stronger() {
        for current in [[kp(10, 10, 10), kp(10, 10, 20), S], [kp(10, 10, 20), kp(10, 10, 10), S]] {
            let out = run_current(&params(), &current);
            assert_eq!(out.records, vec![kp(10, 10, 20), S]);
            assert_eq!(out.stats.suppressed, 1);
        }
    }

    #[test]
    fn equal_responses_keep_first() {
        let a = kp(10, 10, 7).with_orientation(1);
        let b = kp(11, 10, 7).with_orientation(2);
        let out = run_current(&params(), &[a, b, S]);
        assert_eq!(out.survivors(), &[a]);
    }

    #[test]
    fn records_just_outside_radius_all_survive() {
        let current = [kp(10, 20, 5), kp(13, 20, 9), kp(16, 20, 7), S];
        let out = run_current(&params(), &current);
        assert_eq!(out.survivors(), &current[..3]);
        assert_eq!(out.records.last(), Some(&S));
    }

    #[test]
    fn vertical_neighbours_conflict_across_steps() {
        let current = [kp(10, 10, 5), kp(10, 12, 9), kp(10, 15, 1), S];
        let out = run_current(&params(), &current);
        assert_eq!(out.survivors(), &[kp(10, 12, 9), kp(10, 15, 1)]);
    }

    #[test]
    fn border_record_leaves_only_sentinel() {
        let p = DedupParams {
            border_margin: 4,
            ..params()
        };
        let out = run_current(&p, &[kp(2, 30, 100), S]);
        assert_eq!(out.records, vec![S]);
        assert_eq!(out.stats.discarded, 1);
    }

    #[test]
    fn undersized_capacity_is_rejected_up_front() {
        let burst = vec![kp(20, 20, 3); 64];
        let p = DedupParams {
            max_buffer_capacity: 4,
            limits: InputLimits {
                current: 64,
                previous: 0,
                next: 0,
            },
            ..params()
        };
        let result = DedupEngine::new(&p, InputStreams::current_only(&burst));
        assert!(matches!(
            result,
            Err(Error::CapacityTooSmall {
                required: 64,
                configured: 4
            })
        ));
    }

    #[test]
    fn malformed_input_is_rejected_up_front() {
        let mut broken = kp(1, 1, 1);
        broken.invalidate();
        let input = [broken, S];
        let result = DedupEngine::new(&params(), InputStreams::current_only(&input));
        assert!(matches!(result, Err(Error::MalformedRecord { index: 0, .. })));
    }

    #[test]
    fn other_levels_suppress_but_never_survive() {
        let stronger = KeypointRecord::new(px(11), px(10), 50, 1);
        let out = run(
            &params(),
            InputStreams {
                current: &[kp(10, 10, 10), S],
                previous: &[stronger, S],
                next: &[],
            },
        );
        assert_eq!(out.records, vec![S]);
        assert_eq!((out.stats.suppressed, out.stats.discarded), (1, 1));

        let weaker = KeypointRecord::new(px(11), px(10), 5, 2);
        let out = run(
            &params(),
            InputStreams {
                current: &[kp(10, 10, 10), S],
                previous: &[],
                next: &[weaker, S],
            },
        );
        assert_eq!(out.records, vec![kp(10, 10, 10), S]);
    }

    #[test]
    fn discarded_record_still_suppresses() {
        let p = DedupParams {
            border_margin: 5,
            ..params()
        };
        // inside the margin but strong enough to suppress its neighbour inside the image
        let edge = kp(4, 20, 90);
        let inner = kp(6, 20, 30);
        let out = run_current(&p, &[edge, inner, S]);
        assert_eq!(out.records, vec![S]);
        assert_eq!((out.stats.discarded, out.stats.suppressed), (1, 1));
    }

    #[test]
    fn suppressed_record_no_longer_competes() {
        // b beats a, c is within reach of a only and weaker than a
        let a = kp(10, 10, 20);
        let b = kp(8, 10, 30);
        let c = kp(11, 11, 10);
        let out = run_current(&params(), &[a, b, c, S]);
        assert_eq!(out.survivors(), &[b, c]);
    }

    #[test]
    fn wide_vectors_compare_within_the_vector() {
        let p = DedupParams {
            vector_width: 2,
            ..params()
        };
        let current = [kp(10, 10, 5), kp(11, 10, 9), kp(30, 10, 4), S, S, S];
        let out = run_current(&p, &current);
        assert_eq!(out.survivors(), &[kp(11, 10, 9), kp(30, 10, 4)]);
    }

    #[test]
    fn lane_count_does_not_change_output() {
        let mut current = (0..40)
            .map(|i| kp(5 + (i * 7) % 50, 4 + i / 3, 100 + (i * 37) % 11))
            .collect_vec();
        current.extend([S; 4]);
        for width in [1, 3] {
            let p = DedupParams {
                vector_width: width,
                ..params()
            };
            let reference = run_current(&p, &current);
            assert_eq!(reference.stats.records_read, 40);
            for lanes in [2, 4, 8] {
                let p = DedupParams {
                    lane_count: lanes,
                    ..p.clone()
                };
                let out = run_current(&p, &current);
                assert_eq!(out.records, reference.records, "width {width}, lanes {lanes}");
                assert_eq!(out.stats.overflow_evictions, 0);
            }
        }
    }

    #[test]
    fn colocated_burst_beyond_derived_capacity_is_rejected() {
        // 8x8 image, 1 px radius: the derived buffer holds 18 records plus a prefetch of 2
        let p = DedupParams {
            image_width: 8,
            image_height: 8,
            search_radius: radius_from_pixels(1),
            max_buffer_capacity: 0,
            ..DedupParams::default()
        };
        let fmt = p.format();
        let at = fmt.pixels_to_fixed(4) as u16;
        let mut burst = (0..40)
            .map(|i| KeypointRecord::new(at, at, 100 - i, 0))
            .collect_vec();
        burst.push(S);
        let result = DedupEngine::new(&p, InputStreams::current_only(&burst));
        assert!(matches!(
            result,
            Err(Error::CapacityTooSmall {
                required: 40,
                configured: 20
            })
        ));

        burst.truncate(20);
        burst.push(S);
        let out = DedupEngine::new(&p, InputStreams::current_only(&burst))
            .unwrap()
            .run();
        assert_eq!(out.survivors(), &[KeypointRecord::new(at, at, 100, 0)]);
        assert_eq!(out.stats.overflow_evictions, 0);
    }

    #[test]
    fn each_step_emits_at_most_one_record() {
        let mut current = (0..6).map(|i| kp(5 + 5 * i, 5, 10)).collect_vec();
        current.extend([kp(10, 40, 10), S]);
        let mut engine = DedupEngine::new(&params(), InputStreams::current_only(&current)).unwrap();
        let mut emitted = 0;
        loop {
            let state = engine.step();
            let now = engine.stats().emitted;
            assert!(now - emitted <= 1, "step {}", engine.stats().steps);
            emitted = now;
            if state == EngineState::Done {
                break;
            }
        }
        assert_eq!(emitted, 7);
    }

    #[test]
    fn lanes_shorten_comparison_cycles() {
        // one row, nothing ever leaves the window before the drain
        let current = [kp(10, 10, 1), kp(20, 10, 1), kp(30, 10, 1), kp(40, 10, 1), S];
        let steps = |lane_count| {
            let p = DedupParams {
                lane_count,
                ..params()
            };
            let out = run_current(&p, &current);
            assert_eq!(out.survivors(), &current[..4]);
            out.stats.steps
        };
        // cycles of 1, 1, 2 and 3 steps, the end of input, 4 drain steps and the sentinel
        assert_eq!(steps(1), 1 + 1 + 2 + 3 + 1 + 4 + 1);
        // the second lane takes every other resident
        assert_eq!(steps(2), 1 + 1 + 1 + 2 + 1 + 4 + 1);
    }

    #[test]
    fn output_limit_keeps_first_survivors_without_sentinel() {
        let p = DedupParams {
            max_output: 3,
            ..params()
        };
        let current = (0..5).map(|i| kp(10, 5 + 5 * i, 1)).chain([S]).collect_vec();
        let out = run_current(&p, &current);
        assert_eq!(out.records, current[..3].to_vec());
        assert_eq!(out.stats.emitted, 3);
    }

    #[test]
    fn step_limit_still_seals_output() {
        let p = DedupParams {
            max_iterations: 2,
            ..params()
        };
        let current = (0..5).map(|i| kp(10, 5 + 5 * i, 1)).chain([S]).collect_vec();
        let out = run_current(&p, &current);
        assert_eq!(out.records, vec![current[0], S]);
        assert!(out.stats.iteration_limit_hit);
        assert_eq!(out.stats.abandoned, 1);
        assert_eq!(out.stats.steps, 2);
    }

    #[test]
    fn states_progress_in_order() {
        let current = [kp(10, 10, 1), kp(20, 10, 1), kp(30, 10, 1), S];
        let mut engine = DedupEngine::new(&params(), InputStreams::current_only(&current)).unwrap();
        let mut seen = vec![engine.state()];
        loop {
            let state = engine.step();
            if seen.last() != Some(&state) {
                seen.push(state);
            }
            if state == EngineState::Done {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                EngineState::Filling,
                EngineState::Steady,
                EngineState::Draining,
                EngineState::Done
            ]
        );
        assert!(engine.stats().steps <= engine.plan().max_steps);
        assert_eq!(engine.step(), EngineState::Done);
    }

    #[test]
    fn stats_snapshot() {
        let out = run(
            &params(),
            InputStreams {
                current: &[kp(10, 10, 10), kp(40, 10, 10), S],
                previous: &[KeypointRecord::new(px(11), px(10), 50, 1), S],
                next: &[],
            },
        );
        insta::assert_yaml_snapshot!(out.stats, { ".steps" => "[steps]" }, @r###"
        steps: "[steps]"
        records_read: 3
        emitted: 1
        truncated: 0
        suppressed: 1
        discarded: 1
        abandoned: 0
        overflow_evictions: 0
        iteration_limit_hit: false
        "###);
    }
}
