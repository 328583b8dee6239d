use crate::keypoint::KeypointRecord;

/// Bounded output list, closed by a single sentinel when there is room for one.
#[derive(Debug, Clone)]
pub struct OutputSink {
    records: Vec<KeypointRecord>,
    max_output: usize,
    sealed: bool,
}

impl OutputSink {
    pub fn new(max_output: usize) -> Self {
        Self {
            records: Vec::with_capacity(max_output.min(1 << 16)),
            max_output,
            sealed: false,
        }
    }

    /// Appends a survivor. Returns false, dropping the record, once the sink is full or sealed.
    pub fn emit(&mut self, record: KeypointRecord) -> bool {
        debug_assert!(record.is_valid());
        if self.sealed || self.is_full() {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Closes the list. The sentinel is written at most once and never past `max_output`.
    pub fn emit_sentinel(&mut self) {
        if self.sealed {
            return;
        }
        self.sealed = true;
        if !self.is_full() {
            self.records.push(KeypointRecord::SENTINEL);
        }
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.max_output
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<KeypointRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_follows_last_survivor_once() {
        let mut sink = OutputSink::new(4);
        assert!(sink.emit(KeypointRecord::new(1, 1, 1, 0)));
        sink.emit_sentinel();
        sink.emit_sentinel();
        assert!(!sink.emit(KeypointRecord::new(2, 2, 2, 0)));
        let records = sink.into_records();
        assert_eq!(records.len(), 2);
        assert!(records[1].is_sentinel());
    }

    #[test]
    fn full_sink_gets_no_sentinel() {
        let mut sink = OutputSink::new(2);
        assert!(sink.emit(KeypointRecord::new(1, 1, 1, 0)));
        assert!(sink.emit(KeypointRecord::new(2, 2, 2, 0)));
        assert!(sink.is_full());
        assert!(!sink.emit(KeypointRecord::new(3, 3, 3, 0)));
        sink.emit_sentinel();
        assert!(sink.is_sealed());
        assert!(sink.into_records().iter().all(KeypointRecord::is_valid));
    }

    #[test]
    fn empty_run_is_just_the_sentinel() {
        let mut sink = OutputSink::new(1);
        sink.emit_sentinel();
        assert_eq!(sink.into_records(), vec![KeypointRecord::SENTINEL]);
    }
}
