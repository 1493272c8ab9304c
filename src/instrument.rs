/*! VMM3 strip-detector processing path.

Turns validated packets into published events: VMM3 payload parsing,
per-readout calibration and coordinate mapping, per-hybrid event building,
event filtering, pixel computation and serialization. One instance lives in
the processing thread.
*/
use log::debug;

use crate::builder::EventBuilder;
use crate::cluster::{Hit, PLANE_X};
use crate::config::Config;
use crate::dump::PacketDump;
use crate::essheader;
use crate::esstime::to_ns;
use crate::ev44::{Ev44Serializer, ProducerCallback};
use crate::geometry::{EssGeometry, VmmGeometry, INVALID_COORD};
use crate::matcher::Event;
use crate::stats::{Counter, Statistics};
use crate::vmm3::Vmm3Parser;
use crate::Result;

/// Events per ev44 message before an automatic produce.
pub const DEFAULT_MAX_EVENTS: usize = 7000;

/// ADC ceiling; corrected values at or above it are counted but kept.
pub const ADC_SATURATION: u16 = 1023;

/// Processing counters specific to the instrument stage.
#[derive(Clone, Default)]
pub struct InstrumentCounters {
    /// Packets rejected by the envelope parser.
    pub error_ess_headers: Counter,
    /// Readouts on an unconfigured logical ring.
    pub ring_mapping_errors: Counter,
    /// Readouts on an unconfigured FEN.
    pub fen_mapping_errors: Counter,
    /// Readouts resolving to an unconfigured hybrid.
    pub hybrid_mapping_errors: Counter,
    /// Readouts with an unmappable channel.
    pub coord_mapping_errors: Counter,
    /// Corrected ADC values at or above saturation.
    pub max_adc: Counter,
    /// Events published downstream.
    pub events: Counter,
    /// Matched events missing one plane.
    pub events_no_coincidence: Counter,
    /// No-coincidence events that only had the strip plane.
    pub events_matched_strip_only: Counter,
    /// No-coincidence events that only had the wire plane.
    pub events_matched_wire_only: Counter,
    /// Events with both planes present.
    pub events_matched_clusters: Counter,
    /// Events rejected by the strip gap filter.
    pub events_invalid_strip_gap: Counter,
    /// Events rejected by the wire gap filter.
    pub events_invalid_wire_gap: Counter,
    /// Events rejected by the pixel mapping.
    pub pixel_errors: Counter,
}

/// The VMM3 instrument: parsers, builders, geometry and serializer.
pub struct VmmInstrument {
    config: Config,
    geom: VmmGeometry,
    essgeom: EssGeometry,
    /// Envelope parser, owns the packet time reference.
    pub ess_parser: essheader::Parser,
    /// Payload parser.
    pub vmm_parser: Vmm3Parser,
    builders: Vec<EventBuilder>,
    /// Event serializer.
    pub serializer: Ev44Serializer,
    /// Counter block.
    pub counters: InstrumentCounters,
    dump: Option<PacketDump>,
    debug_producer: Option<(ProducerCallback, u64)>,
    packets_seen: u64,
}

impl VmmInstrument {
    /// Build the instrument from a validated configuration. Calibration,
    /// if any, has already been applied onto the config's hybrids.
    #[must_use]
    pub fn new(config: Config, producer: ProducerCallback) -> Self {
        let mut ess_parser = essheader::Parser::new();
        ess_parser.set_max_pulse_time_diff(config.max_pulse_time_ns);
        let builders = (0..config.num_hybrids())
            .map(|_| {
                EventBuilder::new(
                    config.max_clustering_time_gap,
                    config.max_coord_gap,
                    config.max_matching_time_gap,
                    config.time_box_ns,
                )
            })
            .collect();
        let essgeom = EssGeometry::new(u32::from(config.size_x), u32::from(config.size_y));
        let serializer = Ev44Serializer::new(DEFAULT_MAX_EVENTS, &config.instrument_name, producer);
        Self {
            config,
            geom: VmmGeometry,
            essgeom,
            ess_parser,
            vmm_parser: Vmm3Parser::new(),
            builders,
            serializer,
            counters: InstrumentCounters::default(),
            dump: None,
            debug_producer: None,
            packets_seen: 0,
        }
    }

    /// Dump every received packet to `dump`.
    pub fn set_dump(&mut self, dump: PacketDump) {
        self.dump = Some(dump);
    }

    /// Forward every `every`th raw packet to `producer` (the debug topic).
    pub fn set_debug_producer(&mut self, producer: ProducerCallback, every: u64) {
        assert!(every > 0);
        self.debug_producer = Some((producer, every));
    }

    /// The instrument configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register all instrument-side counters.
    pub fn register_stats(&self, stats: &mut Statistics) -> Result<()> {
        let r = &self.ess_parser.stats;
        stats.create("essheader.error_header", &self.counters.error_ess_headers)?;
        stats.create("essheader.error_buffer", &r.error_buffer)?;
        stats.create("essheader.error_cookie", &r.error_cookie)?;
        stats.create("essheader.error_pad", &r.error_pad)?;
        stats.create("essheader.error_size", &r.error_size)?;
        stats.create("essheader.error_version", &r.error_version)?;
        stats.create("essheader.error_output_queue", &r.error_output_queue)?;
        stats.create("essheader.error_type", &r.error_type_subtype)?;
        stats.create("essheader.error_seqno", &r.error_seqnum)?;
        stats.create("essheader.error_timehigh", &r.error_time_high)?;
        stats.create("essheader.error_timefrac", &r.error_time_frac)?;
        stats.create("essheader.heartbeats", &r.heartbeats)?;

        let t = &self.ess_parser.time.counters;
        stats.create("esstime.tof_count", &t.tof_count)?;
        stats.create("esstime.tof_negative", &t.tof_negative)?;
        stats.create("esstime.prevtof_count", &t.prev_tof_count)?;
        stats.create("esstime.prevtof_negative", &t.prev_tof_negative)?;
        stats.create("esstime.tof_toolarge", &t.tof_high)?;
        stats.create("esstime.prevtof_toolarge", &t.prev_tof_high)?;

        let v = &self.vmm_parser.stats;
        stats.create("readouts.error_size", &v.error_size)?;
        stats.create("readouts.error_fiber", &v.error_fiber)?;
        stats.create("readouts.error_fen", &v.error_fen)?;
        stats.create("readouts.error_datalen", &v.error_data_length)?;
        stats.create("readouts.error_timefrac", &v.error_time_frac)?;
        stats.create("readouts.error_bc", &v.error_bc)?;
        stats.create("readouts.error_adc", &v.error_adc)?;
        stats.create("readouts.error_vmm", &v.error_vmm)?;
        stats.create("readouts.error_channel", &v.error_channel)?;
        stats.create("readouts.count", &v.readouts)?;
        stats.create("readouts.bccalib", &v.calib_readouts)?;
        stats.create("readouts.data", &v.data_readouts)?;
        stats.create("readouts.over_threshold", &v.over_threshold)?;

        let c = &self.counters;
        stats.create("readouts.ring_mapping_errors", &c.ring_mapping_errors)?;
        stats.create("readouts.fen_mapping_errors", &c.fen_mapping_errors)?;
        stats.create("readouts.hybrid_errors", &c.hybrid_mapping_errors)?;
        stats.create("readouts.coord_errors", &c.coord_mapping_errors)?;
        stats.create("readouts.max_adc", &c.max_adc)?;

        stats.create("events.count", &c.events)?;
        stats.create("events.pixel_errors", &c.pixel_errors)?;
        stats.create("events.no_coincidence", &c.events_no_coincidence)?;
        stats.create("events.strip_only", &c.events_matched_strip_only)?;
        stats.create("events.wire_only", &c.events_matched_wire_only)?;
        stats.create("events.matched_clusters", &c.events_matched_clusters)?;
        stats.create("events.strip_gaps", &c.events_invalid_strip_gap)?;
        stats.create("events.wire_gaps", &c.events_invalid_wire_gap)?;

        let s = &self.serializer.counters;
        stats.create("produce.cause.pulse_change", &s.produce_cause_pulse_change)?;
        stats.create("produce.cause.max_events_reached", &s.produce_cause_max_events)?;
        stats.create("produce.cause.timeout", &s.produce_cause_timeout)?;
        stats.create("produce.calls", &s.produce_calls)?;
        stats.create("transmit.bytes", &s.tx_bytes)?;
        Ok(())
    }

    /// Process one packet from the ring.
    pub fn process_packet(&mut self, data: &[u8]) {
        self.packets_seen += 1;
        if let Some(dump) = &mut self.dump {
            let _ = dump.push(data);
        }
        if let Some((producer, every)) = &mut self.debug_producer {
            if self.packets_seen % *every == 0 {
                producer(data, 0);
            }
        }

        let packet = match self.ess_parser.validate(data, essheader::TYPE_VMM3) {
            Ok(p) => p,
            Err(e) => {
                debug!("Error parsing ESS readout header: {e}");
                self.counters.error_ess_headers.inc();
                return;
            }
        };
        debug!(
            "PulseHigh {}, PulseLow {}",
            packet.header.pulse_high, packet.header.pulse_low
        );
        self.serializer
            .check_and_set_reference_time(self.ess_parser.time.time_ns as i64);

        self.vmm_parser.parse(packet.data);
        self.process_readouts();
        // No force: open clusters may continue in the next packet, and the
        // matcher holds back clusters inside the safety margin.
        self.flush_events(false);
    }

    // Run clustering and matching over the buffered hits and serialize the
    // resulting events. `force` closes open clusters and resolves every
    // pending match; only the clean-stop path does that.
    fn flush_events(&mut self, force: bool) {
        for builder in &mut self.builders {
            builder.flush(force);
        }
        self.generate_events();
    }

    // Route parsed readouts into the per-hybrid builders.
    fn process_readouts(&mut self) {
        for readout in &self.vmm_parser.result {
            let ring = readout.fiber >> 1;
            if ring >= self.config.num_rings {
                debug!("Invalid ring {ring} (fiber {})", readout.fiber);
                self.counters.ring_mapping_errors.inc();
                continue;
            }
            if readout.fen > self.config.max_fen(ring) {
                debug!("Invalid FEN {} on ring {ring}", readout.fen);
                self.counters.fen_mapping_errors.inc();
                continue;
            }
            let local_hybrid = readout.vmm >> 1;
            let Some(index) = self.config.hybrid_index(ring, readout.fen, local_hybrid) else {
                self.counters.hybrid_mapping_errors.inc();
                continue;
            };
            let hybrid = &self.config.hybrids[usize::from(index)];
            let asic = usize::from(readout.vmm & 1);
            let calib = &hybrid.vmms[asic];

            let raw_ns = to_ns(readout.time_high, readout.time_low) as i64;
            let time = raw_ns.saturating_add(calib.tdc_corr(readout.channel)).max(0) as u64;
            let adc = calib.adc_corr(readout.channel, readout.adc());
            if adc >= ADC_SATURATION {
                self.counters.max_adc.inc();
            }

            let plane = self.geom.plane(readout.vmm);
            let coordinate = if plane == PLANE_X {
                match self.geom.x_coord(readout.vmm, readout.channel) {
                    INVALID_COORD => INVALID_COORD,
                    x => hybrid.x_offset + x,
                }
            } else {
                self.geom.y_coord(hybrid.y_offset, readout.vmm, readout.channel)
            };
            if coordinate == INVALID_COORD {
                self.counters.coord_mapping_errors.inc();
                continue;
            }

            self.builders[usize::from(hybrid.hybrid_number)].insert(Hit {
                time,
                coordinate,
                weight: adc,
                plane,
            });
        }
    }

    // Filter matched events and serialize the survivors.
    fn generate_events(&mut self) {
        let mut events = Vec::new();
        for builder in &mut self.builders {
            events.append(&mut builder.matcher.matched_events);
        }
        for event in events {
            self.generate_event(event);
        }
    }

    fn generate_event(&mut self, e: Event) {
        if e.empty() {
            return;
        }
        if !e.both_planes() {
            self.counters.events_no_coincidence.inc();
            if !e.cluster_a.empty() {
                self.counters.events_matched_strip_only.inc();
            }
            if !e.cluster_b.empty() {
                self.counters.events_matched_wire_only.inc();
            }
            return;
        }
        if self.config.wire_gap_check && e.cluster_b.has_gap(self.config.max_gap_wire) {
            debug!("Event discarded due to wire gap");
            self.counters.events_invalid_wire_gap.inc();
            return;
        }
        if self.config.strip_gap_check && e.cluster_a.has_gap(self.config.max_gap_strip) {
            debug!("Event discarded due to strip gap");
            self.counters.events_invalid_strip_gap.inc();
            return;
        }
        self.counters.events_matched_clusters.inc();

        let event_time = e.time_start();
        let Some(tof) = self.ess_parser.time.tof_ns(event_time, self.config.max_tof_ns) else {
            return;
        };

        let x = e.cluster_a.coord_center().round() as u32;
        let y = e.cluster_b.coord_center().round() as u32;
        let pixel = self.essgeom.pixel2d(x, y);
        if pixel == 0 {
            debug!("Bad pixel: x {x}, y {y}");
            self.counters.pixel_errors.inc();
            return;
        }
        debug!("TOF {tof}, x {x}, y {y}, pixel {pixel}");
        self.serializer.add_event(tof as i32, pixel as i32);
        self.counters.events.inc();
    }

    /// Periodic timer tick: produce whatever is buffered.
    pub fn periodic(&mut self) {
        if self.serializer.event_count() > 0 {
            self.serializer.counters.produce_cause_timeout.inc();
        }
        self.serializer.produce();
    }

    /// Clean-stop flush: close open clusters, resolve the matches the
    /// safety margin was holding back, produce the final message and
    /// flush the dump file.
    pub fn flush(&mut self) {
        self.flush_events(true);
        self.serializer.produce();
        if let Some(dump) = &mut self.dump {
            let _ = dump.flush();
        }
    }
}

impl crate::detector::Instrument for VmmInstrument {
    fn process_packet(&mut self, data: &[u8]) {
        VmmInstrument::process_packet(self, data);
    }

    fn periodic(&mut self) {
        VmmInstrument::periodic(self);
    }

    fn flush(&mut self) {
        VmmInstrument::flush(self);
    }

    fn register_stats(&self, stats: &mut Statistics) -> Result<()> {
        VmmInstrument::register_stats(self, stats)
    }

    fn liveness_counters(&self) -> Vec<Counter> {
        vec![
            self.counters.events.clone(),
            self.serializer.counters.tx_bytes.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ReadoutGenerator;
    use crate::generator::ReadoutSpec;
    use std::sync::mpsc;

    const CONFIG: &str = r#"
    {
      "Detector": "freia",
      "MaxPulseTimeNS": 2000000000,
      "MaxTOFNS": 800000000,
      "MaxClusteringTimeGap": 500,
      "MaxClusteringCoordGap": 2,
      "MaxMatchingTimeGap": 2000,
      "TimeBoxNs": 0,
      "Config": [
        { "Ring": 0, "FEN": 0, "Hybrid": 0, "HybridId": "h0" },
        { "Ring": 0, "FEN": 0, "Hybrid": 1, "HybridId": "h1" },
        { "Ring": 1, "FEN": 1, "Hybrid": 0, "HybridId": "h2" }
      ]
    }"#;

    fn instrument() -> (VmmInstrument, mpsc::Receiver<(Vec<u8>, i64)>) {
        let (tx, rx) = mpsc::channel();
        let producer: ProducerCallback =
            Box::new(move |payload, ts| tx.send((payload.to_vec(), ts)).unwrap());
        let config = Config::from_json("freia", CONFIG).unwrap();
        (VmmInstrument::new(config, producer), rx)
    }

    /// One x and one y readout close in time and on the same hybrid.
    /// Consecutive sequence numbers sit well apart in time, so every
    /// packet forms its own cluster pair.
    fn coincident_packet(seq: u32) -> Vec<u8> {
        let base = 1000 + seq * 100_000;
        let mut generator = ReadoutGenerator::new(essheader::TYPE_VMM3, seq);
        generator.set_pulse(17, 256, 17, 0);
        generator.add_readout(ReadoutSpec {
            fiber: 0,
            fen: 0,
            time_high: 17,
            time_low: base,
            vmm: 0,
            channel: 5,
            otadc: 500,
            ..Default::default()
        });
        generator.add_readout(ReadoutSpec {
            fiber: 0,
            fen: 0,
            time_high: 17,
            time_low: base + 10,
            vmm: 1,
            channel: 20,
            otadc: 500,
            ..Default::default()
        });
        generator.packet()
    }

    #[test]
    fn happy_path_single_event() {
        let (mut inst, rx) = instrument();
        inst.process_packet(&coincident_packet(1));
        assert_eq!(inst.vmm_parser.stats.readouts.value(), 2);
        // The clusters stay open until the end-of-stream flush.
        assert_eq!(inst.counters.events.value(), 0);
        inst.flush();
        assert_eq!(inst.counters.events.value(), 1);
        assert_eq!(inst.counters.events_matched_clusters.value(), 1);
        let (payload, _) = rx.try_recv().expect("final produce");
        // x = 5, y = 20 - 16 = 4 → pixel 4*64 + 5 + 1.
        let msg = crate::ev44::Ev44Message::decode(&payload).unwrap();
        assert_eq!(msg.pixel_id, vec![4 * 64 + 5 + 1]);
    }

    #[test]
    fn cluster_spanning_two_packets_is_one_event() {
        let (mut inst, rx) = instrument();
        // First half of the cluster pair.
        let mut generator = ReadoutGenerator::new(essheader::TYPE_VMM3, 1);
        generator.set_pulse(17, 256, 17, 0);
        for (vmm, channel, tick) in [(0u8, 5u8, 1000u32), (1, 20, 1005)] {
            generator.add_readout(ReadoutSpec {
                fiber: 0,
                fen: 0,
                time_high: 17,
                time_low: tick,
                otadc: 500,
                vmm,
                channel,
                ..Default::default()
            });
        }
        inst.process_packet(&generator.packet());
        // Second half, 30 ticks (≈340 ns) later: inside the clustering
        // gap, adjacent channels.
        for (vmm, channel, tick) in [(0u8, 6u8, 1030u32), (1, 21, 1035)] {
            generator.add_readout(ReadoutSpec {
                fiber: 0,
                fen: 0,
                time_high: 17,
                time_low: tick,
                otadc: 500,
                vmm,
                channel,
                ..Default::default()
            });
        }
        inst.process_packet(&generator.packet());
        assert_eq!(inst.counters.events.value(), 0);

        inst.flush();
        // One event, not two: both packets' hits merged per plane.
        assert_eq!(inst.counters.events.value(), 1);
        assert_eq!(inst.counters.events_no_coincidence.value(), 0);
        let (payload, _) = rx.try_recv().expect("final produce");
        let msg = crate::ev44::Ev44Message::decode(&payload).unwrap();
        // x center 5.5 → 6, y center (4 + 5)/2 → 5.
        assert_eq!(msg.pixel_id, vec![5 * 64 + 6 + 1]);
    }

    #[test]
    fn invalid_ring_is_dropped_before_builders() {
        let (mut inst, _rx) = instrument();
        let mut generator = ReadoutGenerator::new(essheader::TYPE_VMM3, 1);
        generator.set_pulse(17, 0, 16, 0);
        generator.add_readout(ReadoutSpec {
            fiber: 12, // logical ring 6, config has 2
            ..Default::default()
        });
        inst.process_packet(&generator.packet());
        assert_eq!(inst.vmm_parser.stats.readouts.value(), 1);
        assert_eq!(inst.counters.ring_mapping_errors.value(), 1);
        assert_eq!(inst.counters.events.value(), 0);
    }

    #[test]
    fn unconfigured_hybrid_is_dropped() {
        let (mut inst, _rx) = instrument();
        let mut generator = ReadoutGenerator::new(essheader::TYPE_VMM3, 1);
        generator.set_pulse(17, 0, 16, 0);
        generator.add_readout(ReadoutSpec {
            fiber: 0,
            fen: 0,
            vmm: 4, // local hybrid 2, not configured
            channel: 5,
            ..Default::default()
        });
        inst.process_packet(&generator.packet());
        assert_eq!(inst.counters.hybrid_mapping_errors.value(), 1);
    }

    #[test]
    fn tof_negative_against_both_references() {
        let (mut inst, _rx) = instrument();
        let mut generator = ReadoutGenerator::new(essheader::TYPE_VMM3, 1);
        // Pulse at 17 s, previous 10 ms earlier; readout well before both.
        generator.set_pulse(17, 880_525, 16, 87_172_000);
        generator.add_readout(ReadoutSpec {
            fiber: 0,
            fen: 0,
            time_high: 16,
            time_low: 0,
            vmm: 0,
            channel: 5,
            otadc: 100,
            ..Default::default()
        });
        generator.add_readout(ReadoutSpec {
            fiber: 0,
            fen: 0,
            time_high: 16,
            time_low: 10,
            vmm: 1,
            channel: 20,
            otadc: 100,
            ..Default::default()
        });
        inst.process_packet(&generator.packet());
        inst.flush();
        assert_eq!(
            inst.ess_parser.time.counters.prev_tof_negative.value(),
            1
        );
        assert_eq!(inst.counters.events.value(), 0);
        // The event survived matching and filtering, only TOF killed it.
        assert_eq!(inst.counters.events_matched_clusters.value(), 1);
    }

    #[test]
    fn no_coincidence_counters() {
        let (mut inst, _rx) = instrument();
        let mut generator = ReadoutGenerator::new(essheader::TYPE_VMM3, 1);
        generator.set_pulse(17, 0, 16, 0);
        // Lone x-plane readout.
        generator.add_readout(ReadoutSpec {
            fiber: 0,
            fen: 0,
            time_high: 17,
            time_low: 100,
            vmm: 0,
            channel: 5,
            otadc: 100,
            ..Default::default()
        });
        inst.process_packet(&generator.packet());
        inst.flush();
        assert_eq!(inst.counters.events_no_coincidence.value(), 1);
        assert_eq!(inst.counters.events_matched_strip_only.value(), 1);
        assert_eq!(inst.counters.events_matched_wire_only.value(), 0);
        assert_eq!(inst.counters.events.value(), 0);
    }

    #[test]
    fn strip_gap_filter() {
        let (mut inst, _rx) = instrument();
        let mut generator = ReadoutGenerator::new(essheader::TYPE_VMM3, 1);
        generator.set_pulse(17, 0, 16, 0);
        // Two x hits with a missing strip between them, plus a y hit.
        for channel in [5u8, 7] {
            generator.add_readout(ReadoutSpec {
                fiber: 0,
                fen: 0,
                time_high: 17,
                time_low: 100,
                vmm: 0,
                channel,
                otadc: 100,
                ..Default::default()
            });
        }
        generator.add_readout(ReadoutSpec {
            fiber: 0,
            fen: 0,
            time_high: 17,
            time_low: 110,
            vmm: 1,
            channel: 20,
            otadc: 100,
            ..Default::default()
        });
        inst.process_packet(&generator.packet());
        inst.flush();
        assert_eq!(inst.counters.events_invalid_strip_gap.value(), 1);
        assert_eq!(inst.counters.events.value(), 0);
    }

    #[test]
    fn hit_counts_bounded_by_readouts() {
        let (mut inst, _rx) = instrument();
        for seq in 1..=5 {
            inst.process_packet(&coincident_packet(seq));
        }
        inst.flush();
        // Counters accumulate across packets.
        let readouts = inst.vmm_parser.stats.readouts.value();
        let events = inst.counters.events.value();
        assert_eq!(readouts, 10);
        assert_eq!(events, 5);
        assert!(2 * events <= readouts);
    }

    #[test]
    fn bad_header_counts_and_skips() {
        let (mut inst, _rx) = instrument();
        inst.process_packet(&[0u8; 10]);
        assert_eq!(inst.counters.error_ess_headers.value(), 1);
    }

    #[test]
    fn stats_registration_is_unique() {
        let (inst, _rx) = instrument();
        let mut stats = Statistics::new();
        inst.register_stats(&mut stats).unwrap();
        assert!(stats.size() > 30);
    }

    #[test]
    fn periodic_produces_buffered_events() {
        let (mut inst, rx) = instrument();
        // Later packets move the matching horizon, releasing the first
        // packet's event into the serializer.
        for seq in 1..=3 {
            inst.process_packet(&coincident_packet(seq));
        }
        assert_eq!(inst.serializer.event_count(), 1);
        assert!(rx.try_recv().is_err());
        inst.periodic();
        let (payload, _) = rx.try_recv().expect("timeout produce");
        let msg = crate::ev44::Ev44Message::decode(&payload).unwrap();
        assert_eq!(msg.time_of_flight.len(), 1);
        assert_eq!(
            inst.serializer.counters.produce_cause_timeout.value(),
            1
        );
        // Nothing buffered: periodic is a no-op now.
        inst.periodic();
        assert!(rx.try_recv().is_err());
    }
}
