/*! Artificial VMM3 readout packets.

Builds valid envelope + payload packets for tests and for the `udpgen`
load generator. Readouts can be specified one by one or generated as
circular particle tracks like the hardware emulators do; optional fuzzing
flips random bytes to exercise the parsers' error paths.
*/
use rand::Rng;

use crate::essheader::HEADER_SIZE;
use crate::vmm3::VMM3_DATA_SIZE;
use crate::MAX_UDP_PAYLOAD;

/// Readout ticks between the pulse and the first generated readout.
const TIME_TO_FIRST_READOUT: u32 = 1000;

/// One readout to be serialized.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadoutSpec {
    /// Physical fiber id.
    pub fiber: u8,
    /// Front-end node id.
    pub fen: u8,
    /// Readout time, seconds part.
    pub time_high: u32,
    /// Readout time, fractional ticks.
    pub time_low: u32,
    /// Bunch crossing counter.
    pub bc: u16,
    /// Over-threshold flag plus ADC.
    pub otadc: u16,
    /// Geometry byte.
    pub geo: u8,
    /// TDC value.
    pub tdc: u8,
    /// ASIC number.
    pub vmm: u8,
    /// Channel.
    pub channel: u8,
}

/// Packet builder with a running sequence number.
pub struct ReadoutGenerator {
    type_id: u8,
    seq_num: u32,
    pulse: (u32, u32),
    prev_pulse: (u32, u32),
    readouts: Vec<ReadoutSpec>,
}

impl ReadoutGenerator {
    /// Generator for packets of `type_id` starting at `seq_num`.
    #[must_use]
    pub fn new(type_id: u8, seq_num: u32) -> Self {
        Self {
            type_id,
            seq_num,
            pulse: (0, 0),
            prev_pulse: (0, 0),
            readouts: Vec::new(),
        }
    }

    /// Set pulse and previous pulse references.
    pub fn set_pulse(&mut self, high: u32, low: u32, prev_high: u32, prev_low: u32) {
        self.pulse = (high, low);
        self.prev_pulse = (prev_high, prev_low);
    }

    /// Queue one readout.
    pub fn add_readout(&mut self, spec: ReadoutSpec) {
        self.readouts.push(spec);
    }

    /// Queue `num_readouts` readouts forming circular tracks, alternating
    /// planes, spread over `rings` logical rings.
    pub fn generate_track(
        &mut self,
        rings: u8,
        num_readouts: u16,
        ticks_btw_readouts: u32,
        ticks_btw_events: u32,
    ) {
        assert!(rings > 0);
        let mut rng = rand::thread_rng();
        let mut time_low = self.pulse.1 + TIME_TO_FIRST_READOUT;
        let mut angle: f64 = 0.0;
        let mut x_channel = 32.0;
        let mut y_channel = 30.0;
        for i in 0..usize::from(num_readouts) {
            let ring = (i / 10) % usize::from(rings);
            if i % 2 == 0 {
                angle = f64::from(rng.gen::<u8>()) * 360.0 / 255.0;
                x_channel = 32.0 + 10.0 * angle.to_radians().cos();
                y_channel = 30.0 + 10.0 * angle.to_radians().sin();
            }
            let (vmm, channel) = if i % 2 == 0 {
                (1, y_channel as u8) // wire plane
            } else {
                (0, x_channel as u8) // strip plane
            };
            self.add_readout(ReadoutSpec {
                fiber: (ring * 2) as u8,
                fen: 0,
                time_high: self.pulse.0,
                time_low,
                otadc: 1000,
                vmm,
                channel,
                ..Default::default()
            });
            time_low += if i % 2 == 0 {
                ticks_btw_readouts
            } else {
                ticks_btw_events
            };
        }
    }

    /// Serialize the queued readouts into one packet and advance the
    /// sequence number. The readout queue is cleared.
    pub fn packet(&mut self) -> Vec<u8> {
        let total = HEADER_SIZE + self.readouts.len() * VMM3_DATA_SIZE;
        assert!(total <= MAX_UDP_PAYLOAD, "too many readouts for one packet");
        let mut buf = Vec::with_capacity(total);
        buf.push(0); // pad
        buf.push(0); // version
        buf.extend_from_slice(b"ESS");
        buf.push(self.type_id);
        buf.extend_from_slice(&(total as u16).to_le_bytes());
        buf.push(23); // output queue
        buf.push(0); // time source
        buf.extend_from_slice(&self.pulse.0.to_le_bytes());
        buf.extend_from_slice(&self.pulse.1.to_le_bytes());
        buf.extend_from_slice(&self.prev_pulse.0.to_le_bytes());
        buf.extend_from_slice(&self.prev_pulse.1.to_le_bytes());
        buf.extend_from_slice(&self.seq_num.to_le_bytes());
        for r in &self.readouts {
            buf.push(r.fiber);
            buf.push(r.fen);
            buf.extend_from_slice(&(VMM3_DATA_SIZE as u16).to_le_bytes());
            buf.extend_from_slice(&r.time_high.to_le_bytes());
            buf.extend_from_slice(&r.time_low.to_le_bytes());
            buf.extend_from_slice(&r.bc.to_le_bytes());
            buf.extend_from_slice(&r.otadc.to_le_bytes());
            buf.push(r.geo);
            buf.push(r.tdc);
            buf.push(r.vmm);
            buf.push(r.channel);
        }
        debug_assert_eq!(buf.len(), total);
        self.seq_num = self.seq_num.wrapping_add(1);
        self.readouts.clear();
        buf
    }

    /// Sequence number the next packet will carry.
    #[must_use]
    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    /// Flip up to `flips` random bytes of `packet`.
    pub fn fuzz(packet: &mut [u8], flips: usize) {
        if packet.is_empty() {
            return;
        }
        let mut rng = rand::thread_rng();
        for _ in 0..rng.gen_range(0..=flips) {
            let pos = rng.gen_range(0..packet.len());
            packet[pos] = rng.gen();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::essheader::{Parser, TYPE_VMM3};
    use crate::vmm3::Vmm3Parser;

    #[test]
    fn generated_packet_parses() {
        let mut generator = ReadoutGenerator::new(TYPE_VMM3, 7);
        generator.set_pulse(17, 256, 17, 0);
        generator.add_readout(ReadoutSpec {
            fiber: 0,
            fen: 0,
            time_high: 17,
            time_low: 300,
            otadc: 500,
            vmm: 0,
            channel: 11,
            ..Default::default()
        });
        let packet = generator.packet();
        assert_eq!(packet.len(), HEADER_SIZE + VMM3_DATA_SIZE);

        let mut ess = Parser::new();
        let parsed = ess.validate(&packet, TYPE_VMM3).unwrap();
        assert_eq!(parsed.header.seq_num, 7);
        assert_eq!(parsed.data.len(), VMM3_DATA_SIZE);

        let mut vmm = Vmm3Parser::new();
        assert_eq!(vmm.parse(parsed.data), 1);
        assert_eq!(vmm.result[0].channel, 11);
    }

    #[test]
    fn sequence_number_advances() {
        let mut generator = ReadoutGenerator::new(TYPE_VMM3, 0);
        let _ = generator.packet();
        let _ = generator.packet();
        assert_eq!(generator.seq_num(), 2);
        let packet = generator.packet();
        assert_eq!(&packet[26..30], &2u32.to_le_bytes());
    }

    #[test]
    fn track_readouts_are_valid() {
        let mut generator = ReadoutGenerator::new(TYPE_VMM3, 0);
        generator.set_pulse(100, 0, 99, 0);
        generator.generate_track(2, 100, 50, 500);
        let packet = generator.packet();

        let mut ess = Parser::new();
        let parsed = ess.validate(&packet, TYPE_VMM3).unwrap();
        let mut vmm = Vmm3Parser::new();
        assert_eq!(vmm.parse(parsed.data), 100);
        assert_eq!(vmm.stats.readouts.value(), 100);
        for r in &vmm.result {
            assert!(r.fiber <= 2);
            assert!(r.channel < 64);
        }
    }

    #[test]
    fn fuzzed_packets_never_panic_the_parsers() {
        let mut generator = ReadoutGenerator::new(TYPE_VMM3, 0);
        for _ in 0..200 {
            generator.set_pulse(100, 0, 99, 0);
            generator.generate_track(2, 20, 50, 500);
            let mut packet = generator.packet();
            ReadoutGenerator::fuzz(&mut packet, 20);
            let mut ess = Parser::new();
            if let Ok(parsed) = ess.validate(&packet, TYPE_VMM3) {
                let mut vmm = Vmm3Parser::new();
                let _ = vmm.parse(parsed.data);
            }
        }
    }
}
