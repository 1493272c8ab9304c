/*! Pulse-time bookkeeping and time-of-flight computation.

Every readout envelope carries two reference timestamps, the current and the
previous pulse. A readout timestamp is matched against the current pulse
first and falls back to the previous one, so that readouts from the tail of
the previous frame still get a valid TOF.

Timestamps are pairs of a seconds count and a fractional tick of the
88.0525 MHz ESS clock. Conversion to nanoseconds is integer-rational, so
the same input always yields the same TOF.
*/
use crate::stats::Counter;

/// ESS timing system clock frequency; fractional tick values must stay
/// below this.
pub const ESS_CLOCK_FREQ_HZ: u64 = 88_052_500;

const NS_PER_SEC: u64 = 1_000_000_000;

/// Convert a (seconds, fractional ticks) pair to nanoseconds.
#[must_use]
pub fn to_ns(high: u32, low: u32) -> u64 {
    u64::from(high) * NS_PER_SEC + u64::from(low) * NS_PER_SEC / ESS_CLOCK_FREQ_HZ
}

/// True if the fractional part is a valid tick count.
#[must_use]
pub fn valid_frac(low: u32) -> bool {
    u64::from(low) < ESS_CLOCK_FREQ_HZ
}

/// TOF bookkeeping counters, shared with the stats registry.
#[derive(Clone, Default)]
pub struct TimeCounters {
    /// TOFs computed against the current pulse.
    pub tof_count: Counter,
    /// Readouts older than the current pulse (prev-pulse fallback taken).
    pub tof_negative: Counter,
    /// TOFs computed against the previous pulse.
    pub prev_tof_count: Counter,
    /// Readouts older than both references; dropped.
    pub prev_tof_negative: Counter,
    /// TOFs beyond the configured maximum, current pulse.
    pub tof_high: Counter,
    /// TOFs beyond the configured maximum, previous pulse.
    pub prev_tof_high: Counter,
}

/// Time reference extracted from a validated envelope.
#[derive(Clone, Default)]
pub struct EssTime {
    /// Current pulse time in ns.
    pub time_ns: u64,
    /// Previous pulse time in ns.
    pub prev_time_ns: u64,
    /// TOF statistics.
    pub counters: TimeCounters,
}

impl EssTime {
    /// New reference with zeroed pulse times.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current pulse reference. The caller has already validated
    /// the fractional part.
    pub fn set_reference(&mut self, high: u32, low: u32) -> u64 {
        debug_assert!(valid_frac(low));
        self.time_ns = to_ns(high, low);
        self.time_ns
    }

    /// Set the previous pulse reference.
    pub fn set_prev_reference(&mut self, high: u32, low: u32) -> u64 {
        debug_assert!(valid_frac(low));
        self.prev_time_ns = to_ns(high, low);
        self.prev_time_ns
    }

    /// TOF for an absolute readout time in ns, or `None` when the readout
    /// is invalid against both references or beyond `max_tof_ns`.
    #[must_use]
    pub fn tof_ns(&self, readout_ns: u64, max_tof_ns: u64) -> Option<u64> {
        if readout_ns >= self.time_ns {
            let tof = readout_ns - self.time_ns;
            self.counters.tof_count.inc();
            if tof > max_tof_ns {
                self.counters.tof_high.inc();
                return None;
            }
            return Some(tof);
        }
        self.counters.tof_negative.inc();
        if readout_ns >= self.prev_time_ns {
            let tof = readout_ns - self.prev_time_ns;
            self.counters.prev_tof_count.inc();
            if tof > max_tof_ns {
                self.counters.prev_tof_high.inc();
                return None;
            }
            return Some(tof);
        }
        self.counters.prev_tof_negative.inc();
        None
    }
}
