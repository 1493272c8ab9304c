/*! Detector pipeline skeleton and lifecycle.

Runs the two-thread pipeline common to all instruments: a UDP ingress
thread feeding the packet ring, and a processing thread driving an
[`Instrument`] implementation. Both threads poll a cancellation token and
stop within two receive timeouts of it being set; in-flight packets are
discarded on shutdown and the final produce happens only on a clean stop.
*/
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info};

use crate::runtimestat::RuntimeStat;
use crate::socket::{UdpReceiver, RECV_TIMEOUT};
use crate::stats::{Counter, Statistics};
use crate::{fifo, ring, Error, Result};

/// Packet ring slots.
pub const ETHERNET_BUFFER_MAX_ENTRIES: usize = 20_000;

/// Extra ring slots beyond the FIFO capacity; the write slot is never one
/// the reader can still hold.
const RING_SPARE_SLOTS: usize = 11;

/// Idle sleep of the processing loop.
const PROCESSING_IDLE_SLEEP: Duration = Duration::from_micros(10);

/// A detector-specific processing plugin driven by the pipeline skeleton.
pub trait Instrument: Send {
    /// Process one packet popped from the ring.
    fn process_packet(&mut self, data: &[u8]);

    /// Periodic tick at the update interval (timer-driven produce).
    fn periodic(&mut self);

    /// Clean-stop flush.
    fn flush(&mut self);

    /// Register the instrument's counters.
    fn register_stats(&self, stats: &mut Statistics) -> Result<()>;

    /// Counters sampled for the runtime status mask, after the pipeline's
    /// own receive counter.
    fn liveness_counters(&self) -> Vec<Counter> {
        Vec::new()
    }
}

/// Token for asynchronously stopping the pipeline, for example from a
/// Ctrl-C handler.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// New, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pipeline settings common to all detectors.
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Local address to bind the readout socket to.
    pub detector_address: String,
    /// UDP port for readout data.
    pub detector_port: u16,
    /// Requested kernel receive buffer, bytes.
    pub rx_socket_buffer_size: usize,
    /// Requested kernel send buffer, bytes.
    pub tx_socket_buffer_size: usize,
    /// Counter scrape / produce-timer cadence.
    pub update_interval: Duration,
    /// Graphite metric prefix.
    pub graphite_prefix: String,
    /// Graphite region segment.
    pub graphite_region: String,
    /// Optional CPU pin for the ingress thread.
    pub input_cpu: Option<usize>,
    /// Optional CPU pin for the processing thread.
    pub processing_cpu: Option<usize>,
    /// Packet ring / FIFO capacity.
    pub ring_entries: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            detector_address: "0.0.0.0".into(),
            detector_port: 9000,
            rx_socket_buffer_size: 2_000_000,
            tx_socket_buffer_size: 2_000_000,
            update_interval: Duration::from_secs(1),
            graphite_prefix: "efu".into(),
            graphite_region: "0".into(),
            input_cpu: None,
            processing_cpu: None,
            ring_entries: ETHERNET_BUFFER_MAX_ENTRIES,
        }
    }
}

/// Pipeline counters.
#[derive(Clone, Default)]
pub struct DetectorCounters {
    /// Datagrams received.
    pub rx_packets: Counter,
    /// Bytes received.
    pub rx_bytes: Counter,
    /// Receive timeouts.
    pub rx_idle: Counter,
    /// Packets dropped because the FIFO was full.
    pub fifo_push_errors: Counter,
    /// Popped slots with no payload.
    pub fifo_seq_errors: Counter,
    /// Processing loop iterations with an empty FIFO.
    pub processing_idle: Counter,
    /// Runtime status mask gauge.
    pub runtime_status: Counter,
}

/// The two-thread pipeline for one detector instance.
pub struct Detector {
    settings: DetectorSettings,
    receiver: UdpReceiver,
    cancel: CancellationToken,
    /// Pipeline counters.
    pub counters: DetectorCounters,
    stats: Option<Arc<Statistics>>,
}

impl Detector {
    /// Bind the readout socket and prepare the pipeline. Socket errors are
    /// fatal here, before any thread starts.
    pub fn new(settings: DetectorSettings) -> Result<Self> {
        let local: SocketAddr = format!(
            "{}:{}",
            settings.detector_address, settings.detector_port
        )
        .parse()
        .map_err(|e| Error::Config(format!("bad receive address: {e}")))?;
        let receiver = UdpReceiver::new(local)?;
        receiver.set_buffer_sizes(
            settings.tx_socket_buffer_size,
            settings.rx_socket_buffer_size,
        )?;
        receiver.check_rx_buffer_size(settings.rx_socket_buffer_size);
        receiver.print_buffer_sizes();
        receiver.set_recv_timeout(RECV_TIMEOUT)?;
        Ok(Self {
            settings,
            receiver,
            cancel: CancellationToken::new(),
            counters: DetectorCounters::default(),
            stats: None,
        })
    }

    /// Token that stops the pipeline when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Actual bound address (relevant when the port was 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.receiver.local_addr()
    }

    /// Build the stats registry: pipeline counters plus the instrument's.
    ///
    /// Call once, before [`Detector::run`]. The returned handle is what
    /// the telemetry scraper reads.
    pub fn register_stats(&mut self, instrument: &dyn Instrument) -> Result<Arc<Statistics>> {
        let mut stats = Statistics::new();
        stats.set_prefix(&self.settings.graphite_prefix, &self.settings.graphite_region);
        let c = &self.counters;
        stats.create("receive.packets", &c.rx_packets)?;
        stats.create("receive.bytes", &c.rx_bytes)?;
        stats.create("receive.idle", &c.rx_idle)?;
        stats.create("receive.dropped", &c.fifo_push_errors)?;
        stats.create("receive.fifo_seq_errors", &c.fifo_seq_errors)?;
        stats.create("thread.processing_idle", &c.processing_idle)?;
        stats.create("main.runtime_status", &c.runtime_status)?;
        instrument.register_stats(&mut stats)?;
        let stats = Arc::new(stats);
        self.stats = Some(stats.clone());
        Ok(stats)
    }

    /// Registered stats, if [`Detector::register_stats`] ran.
    #[must_use]
    pub fn stats(&self) -> Option<Arc<Statistics>> {
        self.stats.clone()
    }

    /// Run the pipeline until the cancellation token fires. Blocks.
    pub fn run<I: Instrument + 'static>(self, instrument: I) -> Result<()> {
        let (writer, reader) = ring::new(self.settings.ring_entries + RING_SPARE_SLOTS);
        let (pusher, popper) = fifo::new(self.settings.ring_entries);
        info!(
            "Created {} rx ring buffers of size {}",
            self.settings.ring_entries + RING_SPARE_SLOTS,
            crate::MAX_UDP_PAYLOAD
        );

        let input = {
            let counters = self.counters.clone();
            let cancel = self.cancel.clone();
            let receiver = self.receiver;
            let cpu = self.settings.input_cpu;
            std::thread::Builder::new()
                .name("input".into())
                .spawn(move || {
                    input_thread(receiver, writer, pusher, counters, cancel, cpu);
                })
                .map_err(|e| Error::Thread(format!("failed to spawn input thread: {e}")))?
        };

        let processing = {
            let counters = self.counters.clone();
            let cancel = self.cancel.clone();
            let interval = self.settings.update_interval;
            let cpu = self.settings.processing_cpu;
            std::thread::Builder::new()
                .name("processing".into())
                .spawn(move || {
                    processing_thread(instrument, reader, popper, counters, cancel, interval, cpu);
                })
                .map_err(|e| Error::Thread(format!("failed to spawn processing thread: {e}")))?
        };

        let mut result = Ok(());
        for (name, handle) in [("input", input), ("processing", processing)] {
            if handle.join().is_err() {
                error!("{name} thread panicked");
                result = Err(Error::Thread(format!("{name} thread panicked")));
            }
        }
        result
    }
}

fn input_thread(
    receiver: UdpReceiver,
    mut writer: ring::RingWriter,
    mut pusher: fifo::FifoPusher,
    counters: DetectorCounters,
    cancel: CancellationToken,
    cpu: Option<usize>,
) {
    if let Some(core) = cpu {
        pin_to_core(core);
    }
    while !cancel.is_canceled() {
        let buffer = writer.buffer_mut();
        match receiver.receive(buffer) {
            Ok(Some(read_size)) if read_size > 0 => {
                let index = writer.commit(read_size);
                counters.rx_packets.inc();
                counters.rx_bytes.add(read_size as i64);
                if pusher.push(index) {
                    writer.advance();
                } else {
                    counters.fifo_push_errors.inc();
                }
            }
            Ok(_) => counters.rx_idle.inc(),
            Err(e) => {
                error!("Receive error: {e}");
                counters.rx_idle.inc();
            }
        }
    }
    info!("Stopping input thread");
}

fn processing_thread<I: Instrument>(
    mut instrument: I,
    reader: ring::RingReader,
    mut popper: fifo::FifoPopper,
    counters: DetectorCounters,
    cancel: CancellationToken,
    update_interval: Duration,
    cpu: Option<usize>,
) {
    if let Some(core) = cpu {
        pin_to_core(core);
    }
    let liveness = instrument.liveness_counters();
    let sample = |liveness: &[Counter]| {
        let mut v = vec![counters.rx_packets.value()];
        v.extend(liveness.iter().map(Counter::value));
        v
    };
    let mut runtime_stat = RuntimeStat::new(sample(&liveness));
    let mut produce_timer = Instant::now();

    while !cancel.is_canceled() {
        if let Some(index) = popper.pop() {
            let data = reader.data(index);
            if data.is_empty() {
                counters.fifo_seq_errors.inc();
            } else {
                instrument.process_packet(data);
            }
        } else {
            counters.processing_idle.inc();
            std::thread::sleep(PROCESSING_IDLE_SLEEP);
        }

        if produce_timer.elapsed() >= update_interval {
            let mask = runtime_stat.runtime_status_mask(&sample(&liveness));
            counters.runtime_status.set(i64::from(mask));
            instrument.periodic();
            produce_timer = Instant::now();
        }
    }
    instrument.flush();
    info!("Stopping processing thread");
}

#[cfg(target_os = "linux")]
fn pin_to_core(core: usize) {
    // SAFETY: cpu_set_t is plain data; CPU_ZERO/CPU_SET only write into it.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            error!("Could not pin thread to core {core}");
        } else {
            info!("Pinned thread to core {core}");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(_core: usize) {}
