/*! VMM3a readout payload parser.

The payload of a VMM3 envelope is a sequence of 20-byte packed readout
records. The first four bytes of each record double as the common data
header (fiber, FEN, length), so the stride is fixed and a corrupt record
never desynchronises the walk. Field violations are counted individually
and the offending record is skipped; parsing continues with the next one.
*/
use crate::esstime::valid_frac;
use crate::stats::Counter;
use crate::MAX_UDP_PAYLOAD;

/// Size of one packed readout record.
pub const VMM3_DATA_SIZE: usize = 20;

/// Largest valid fiber id (two fibers per logical ring).
pub const MAX_FIBER_ID: u8 = 22;

/// Largest valid front-end node id for this detector family.
pub const DEFAULT_MAX_FEN_ID: u8 = 23;

/// Largest valid VMM ASIC number (2 per hybrid, 8 hybrids).
pub const MAX_VMM: u8 = 15;

/// Largest valid channel within one ASIC.
pub const MAX_CHANNEL: u8 = 63;

/// Largest valid bunch-crossing value (12 bits).
pub const MAX_BC: u16 = 4095;

/// ADC payload mask: 10 data bits.
pub const ADC_MASK: u16 = 0x03ff;

/// Reserved OTADC bits that must read zero (between ADC and the OT flag).
pub const ADC_RESERVED_MASK: u16 = 0x7c00;

/// Over-threshold flag in the OTADC field.
pub const OT_FLAG: u16 = 0x8000;

/// Calibration marker in the GEO field.
pub const GEO_CALIB_FLAG: u8 = 0x80;

/// One parsed readout record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vmm3Data {
    /// Physical fiber id; logical ring is `fiber / 2`.
    pub fiber: u8,
    /// Front-end node id.
    pub fen: u8,
    /// Record length field, always 20.
    pub data_length: u16,
    /// Readout time, seconds part.
    pub time_high: u32,
    /// Readout time, fractional ticks.
    pub time_low: u32,
    /// Bunch crossing counter.
    pub bc: u16,
    /// Over-threshold flag plus 10-bit ADC.
    pub otadc: u16,
    /// Geometry byte; bit 7 marks calibration readouts.
    pub geo: u8,
    /// Time-to-digital value for fine time correction.
    pub tdc: u8,
    /// ASIC number.
    pub vmm: u8,
    /// Channel within the ASIC.
    pub channel: u8,
}

impl Vmm3Data {
    /// ADC value without the flag bits.
    #[must_use]
    pub fn adc(&self) -> u16 {
        self.otadc & ADC_MASK
    }

    /// True when the over-threshold flag is set.
    #[must_use]
    pub fn over_threshold(&self) -> bool {
        self.otadc & OT_FLAG != 0
    }

    /// True for calibration (non-data) readouts.
    #[must_use]
    pub fn is_calibration(&self) -> bool {
        self.geo & GEO_CALIB_FLAG != 0
    }
}

/// Readout parser counters. Each failed check increments exactly one.
#[derive(Clone, Default)]
pub struct VmmStats {
    /// Truncated payload tails.
    pub error_size: Counter,
    /// Fiber id out of range.
    pub error_fiber: Counter,
    /// FEN id out of range.
    pub error_fen: Counter,
    /// Record length field not 20.
    pub error_data_length: Counter,
    /// Fractional readout time out of range.
    pub error_time_frac: Counter,
    /// Bunch crossing out of range.
    pub error_bc: Counter,
    /// Reserved ADC bits set.
    pub error_adc: Counter,
    /// ASIC number out of range.
    pub error_vmm: Counter,
    /// Channel out of range.
    pub error_channel: Counter,
    /// Successfully parsed readouts.
    pub readouts: Counter,
    /// Parsed readouts carrying detector data.
    pub data_readouts: Counter,
    /// Parsed readouts carrying calibration data.
    pub calib_readouts: Counter,
    /// Data readouts with the over-threshold flag.
    pub over_threshold: Counter,
}

/// VMM3 payload parser. Reuses its result vector across packets.
pub struct Vmm3Parser {
    /// Counter block.
    pub stats: VmmStats,
    /// Data readouts of the last parsed packet, in wire order.
    pub result: Vec<Vmm3Data>,
    max_fen_id: u8,
}

impl Default for Vmm3Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Vmm3Parser {
    /// New parser with capacity for the largest possible packet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: VmmStats::default(),
            result: Vec::with_capacity(MAX_UDP_PAYLOAD / VMM3_DATA_SIZE),
            max_fen_id: DEFAULT_MAX_FEN_ID,
        }
    }

    /// Override the per-detector FEN limit.
    pub fn set_max_fen_id(&mut self, max: u8) {
        self.max_fen_id = max;
    }

    /// Parse one packet payload, appending data readouts to
    /// [`Vmm3Parser::result`] (cleared first). Returns the number of
    /// readouts parsed, calibration ones included.
    pub fn parse(&mut self, data: &[u8]) -> usize {
        self.result.clear();
        let mut parsed = 0;

        let mut chunks = data.chunks_exact(VMM3_DATA_SIZE);
        for raw in &mut chunks {
            let readout = Vmm3Data {
                fiber: raw[0],
                fen: raw[1],
                data_length: u16::from_le_bytes([raw[2], raw[3]]),
                time_high: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
                time_low: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
                bc: u16::from_le_bytes([raw[12], raw[13]]),
                otadc: u16::from_le_bytes([raw[14], raw[15]]),
                geo: raw[16],
                tdc: raw[17],
                vmm: raw[18],
                channel: raw[19],
            };

            if usize::from(readout.data_length) != VMM3_DATA_SIZE {
                self.stats.error_data_length.inc();
                continue;
            }
            if readout.fiber > MAX_FIBER_ID {
                self.stats.error_fiber.inc();
                continue;
            }
            if readout.fen > self.max_fen_id {
                self.stats.error_fen.inc();
                continue;
            }
            if !valid_frac(readout.time_low) {
                self.stats.error_time_frac.inc();
                continue;
            }
            if readout.bc > MAX_BC {
                self.stats.error_bc.inc();
                continue;
            }
            if readout.otadc & ADC_RESERVED_MASK != 0 {
                self.stats.error_adc.inc();
                continue;
            }
            if readout.vmm > MAX_VMM {
                self.stats.error_vmm.inc();
                continue;
            }
            if readout.channel > MAX_CHANNEL {
                self.stats.error_channel.inc();
                continue;
            }

            parsed += 1;
            self.stats.readouts.inc();
            if readout.is_calibration() {
                self.stats.calib_readouts.inc();
                continue;
            }
            self.stats.data_readouts.inc();
            if readout.over_threshold() {
                self.stats.over_threshold.inc();
            }
            self.result.push(readout);
        }
        if !chunks.remainder().is_empty() {
            self.stats.error_size.inc();
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Vec<u8> {
        let mut r = vec![0u8; VMM3_DATA_SIZE];
        r[2..4].copy_from_slice(&20u16.to_le_bytes());
        r
    }

    fn with(f: impl FnOnce(&mut [u8])) -> Vec<u8> {
        let mut r = record();
        f(&mut r);
        r
    }

    #[test]
    fn parses_one_readout() {
        let mut p = Vmm3Parser::new();
        let raw = with(|r| {
            r[0] = 2; // fiber
            r[1] = 1; // fen
            r[4..8].copy_from_slice(&17u32.to_le_bytes());
            r[8..12].copy_from_slice(&257u32.to_le_bytes());
            r[14..16].copy_from_slice(&0x0101u16.to_le_bytes());
            r[18] = 0; // vmm
            r[19] = 5; // channel
        });
        assert_eq!(p.parse(&raw), 1);
        assert_eq!(p.result.len(), 1);
        let d = &p.result[0];
        assert_eq!(d.fiber, 2);
        assert_eq!(d.fen, 1);
        assert_eq!(d.time_high, 17);
        assert_eq!(d.time_low, 257);
        assert_eq!(d.adc(), 0x101);
        assert_eq!(d.channel, 5);
        assert_eq!(p.stats.readouts.value(), 1);
        assert_eq!(p.stats.data_readouts.value(), 1);
    }

    #[test]
    fn empty_payload() {
        let mut p = Vmm3Parser::new();
        assert_eq!(p.parse(&[]), 0);
        assert_eq!(p.stats.error_size.value(), 0);
    }

    #[test]
    fn truncated_tail() {
        let mut p = Vmm3Parser::new();
        let mut raw = record();
        raw.extend_from_slice(&[0u8; 7]);
        assert_eq!(p.parse(&raw), 1);
        assert_eq!(p.stats.error_size.value(), 1);
    }

    #[test]
    fn bad_fields_each_count_once() {
        let p = Vmm3Parser::new();
        let cases: Vec<(Vec<u8>, &Counter)> = vec![
            (with(|r| r[2..4].copy_from_slice(&24u16.to_le_bytes())), &p.stats.error_data_length),
            (with(|r| r[0] = 23), &p.stats.error_fiber),
            (with(|r| r[1] = 24), &p.stats.error_fen),
            (
                with(|r| r[8..12].copy_from_slice(&88_052_500u32.to_le_bytes())),
                &p.stats.error_time_frac,
            ),
            (with(|r| r[12..14].copy_from_slice(&4096u16.to_le_bytes())), &p.stats.error_bc),
            (
                with(|r| r[14..16].copy_from_slice(&0x0400u16.to_le_bytes())),
                &p.stats.error_adc,
            ),
            (with(|r| r[18] = 16), &p.stats.error_vmm),
            (with(|r| r[19] = 64), &p.stats.error_channel),
        ];
        let counters: Vec<Counter> = cases.iter().map(|(_, c)| (*c).clone()).collect();
        for (i, (raw, _)) in cases.iter().enumerate() {
            let mut parser = Vmm3Parser::new();
            // Shared counters so the outer handles observe the increments.
            parser.stats = p.stats.clone();
            let before = counters[i].value();
            assert_eq!(parser.parse(raw), 0, "case {i}");
            assert!(parser.result.is_empty(), "case {i}");
            assert_eq!(counters[i].value(), before + 1, "case {i}");
        }
        assert_eq!(p.stats.readouts.value(), 0);
    }

    #[test]
    fn bad_record_does_not_stop_parsing() {
        let mut p = Vmm3Parser::new();
        let mut raw = with(|r| r[19] = 64); // bad channel
        raw.extend_from_slice(&record()); // good record
        assert_eq!(p.parse(&raw), 1);
        assert_eq!(p.result.len(), 1);
        assert_eq!(p.stats.error_channel.value(), 1);
    }

    #[test]
    fn calibration_readouts_are_counted_not_kept() {
        let mut p = Vmm3Parser::new();
        let raw = with(|r| r[16] = GEO_CALIB_FLAG);
        assert_eq!(p.parse(&raw), 1);
        assert!(p.result.is_empty());
        assert_eq!(p.stats.calib_readouts.value(), 1);
        assert_eq!(p.stats.data_readouts.value(), 0);
    }

    #[test]
    fn over_threshold_flag() {
        let mut p = Vmm3Parser::new();
        let raw = with(|r| r[14..16].copy_from_slice(&(OT_FLAG | 100).to_le_bytes()));
        assert_eq!(p.parse(&raw), 1);
        assert_eq!(p.stats.over_threshold.value(), 1);
        assert_eq!(p.result[0].adc(), 100);
        assert!(p.result[0].over_threshold());
    }

    #[test]
    fn result_capacity_is_bounded() {
        let p = Vmm3Parser::new();
        assert_eq!(p.result.capacity(), MAX_UDP_PAYLOAD / VMM3_DATA_SIZE);
    }
}
