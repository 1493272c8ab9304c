/*! Runtime status heuristic.

A cheap liveness signal for dashboards: sample a few key counters every
update interval and report a bit mask of which ones moved. A healthy
pipeline shows all bits set; a stuck stage shows up as a cleared bit.
*/

/// Tracks movement of a fixed set of counters between samples.
pub struct RuntimeStat {
    previous: Vec<i64>,
}

impl RuntimeStat {
    /// Tracker primed with the initial counter sample.
    #[must_use]
    pub fn new(initial: Vec<i64>) -> Self {
        Self { previous: initial }
    }

    /// Bit `i` of the result is set when `sample[i]` changed since the
    /// previous call.
    pub fn runtime_status_mask(&mut self, sample: &[i64]) -> u32 {
        debug_assert_eq!(sample.len(), self.previous.len());
        let mut mask = 0;
        for (i, (new, old)) in sample.iter().zip(&self.previous).enumerate() {
            if new != old {
                mask |= 1 << i;
            }
        }
        self.previous.clear();
        self.previous.extend_from_slice(sample);
        mask
    }
}
