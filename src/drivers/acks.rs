use std::collections::BTreeSet;

/// Acknowledgments of one partition. Everything below `watermark` is
/// consumed; `acked` holds the out-of-order acks above it.
#[derive(Debug, Clone)]
pub(crate) struct AckState {
    watermark: i64,
    acked: BTreeSet<i64>,
}

impl AckState {
    pub(crate) fn starting_at(watermark: i64) -> Self {
        Self {
            watermark,
            acked: BTreeSet::new(),
        }
    }

    /// First unacknowledged offset.
    pub(crate) fn watermark(&self) -> i64 {
        self.watermark
    }

    /// Acknowledged offsets at or above the watermark.
    pub(crate) fn pending(&self) -> usize {
        self.acked.len()
    }

    pub(crate) fn is_acked(&self, offset: i64) -> bool {
        offset < self.watermark || self.acked.contains(&offset)
    }

    /// Record an ack. Returns true when the watermark moved.
    pub(crate) fn ack(&mut self, offset: i64) -> bool {
        if offset < self.watermark {
            return false;
        }
        self.acked.insert(offset);
        let before = self.watermark;
        while self.acked.remove(&self.watermark) {
            self.watermark += 1;
        }
        self.watermark > before
    }
}
