//! ESS event formation unit daemon.
//!
//! Loads a detector configuration, binds the readout socket, and runs the
//! two-thread pipeline until stopped by Ctrl-C or `--stopafter`.
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{debug, error, info};

use efu::calibration::CalibFile;
use efu::config::Config;
use efu::detector::{Detector, DetectorSettings};
use efu::dump::PacketDump;
use efu::ev44::ProducerCallback;
use efu::hwcheck::HwCheck;
use efu::instrument::VmmInstrument;
use efu::Error;

/// Raw packet snapshot cadence on the debug topic.
const DEBUG_SNAPSHOT_INTERVAL: u64 = 1000;

#[derive(clap::Parser, Debug)]
#[command(version, about = "ESS event formation unit")]
struct Opt {
    /// Detector module to run.
    #[arg(long, default_value = "freia")]
    detector: String,

    /// Instrument configuration file (JSON).
    #[arg(long)]
    config: String,

    /// Calibration file (JSON).
    #[arg(long)]
    calibration: Option<String>,

    /// IP address of the receive interface.
    #[arg(long = "rx", default_value = "0.0.0.0")]
    rx_address: String,

    /// UDP port for readout data.
    #[arg(long, default_value = "9000")]
    port: u16,

    /// Kafka broker as host:port.
    #[arg(long, default_value = "localhost:9092")]
    broker: String,

    /// Event topic; defaults to `<detector>_detector`.
    #[arg(long)]
    topic: Option<String>,

    /// Terminate after this many seconds.
    #[arg(long)]
    stopafter: Option<u64>,

    /// Dump received packets to files with this prefix.
    #[arg(long)]
    dumpprefix: Option<String>,

    /// Graphite/carbon server address.
    #[arg(long, default_value = "127.0.0.1")]
    graphite: String,

    /// Graphite/carbon TCP port.
    #[arg(long, default_value = "2003")]
    gport: u16,

    /// Counter scrape and produce-timer cadence in seconds.
    #[arg(long, default_value = "1")]
    updateinterval: u64,

    /// Pin the input thread to this core.
    #[arg(long)]
    core_input: Option<usize>,

    /// Pin the processing thread to this core.
    #[arg(long)]
    core_processing: Option<usize>,

    /// Skip the interface MTU pre-flight check.
    #[arg(long)]
    nohwcheck: bool,

    /// Minimum interface MTU required by the pre-flight check.
    #[arg(long, default_value = "9000")]
    minmtu: usize,

    /// Verbosity of debug messages.
    #[arg(short, default_value = "1")]
    verbose: usize,
}

fn main() -> ExitCode {
    let opt = Opt::parse();
    if let Err(e) = stderrlog::new()
        .module(module_path!())
        .module("efu")
        .verbosity(opt.verbose)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
    {
        eprintln!("logger init failed: {e}");
        return ExitCode::from(1);
    }

    match run(opt) {
        Ok(()) => {
            info!("Clean stop");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            let code = match e.downcast_ref::<Error>() {
                Some(Error::HwCheck(_)) => 2,
                Some(Error::Thread(_)) => 3,
                _ => 1,
            };
            ExitCode::from(code)
        }
    }
}

fn run(opt: Opt) -> anyhow::Result<()> {
    info!("Starting event formation pipeline");
    info!("  Detector:     {}", opt.detector);
    info!("  Config:       {}", opt.config);
    info!("  IP addr:      {}:{}", opt.rx_address, opt.port);
    info!("  Kafka broker: {}", opt.broker);
    info!("  Graphite:     {}:{}", opt.graphite, opt.gport);

    if !opt.nohwcheck {
        let mut check = HwCheck::new();
        check.set_minimum_mtu(opt.minmtu);
        if !check.check_mtu(&["lo", "docker", "veth", "ppp"]) {
            return Err(Error::HwCheck(format!("interface MTU below {}", opt.minmtu)).into());
        }
    }

    let mut config = Config::load(&opt.detector, &opt.config)
        .with_context(|| format!("loading config {}", opt.config))?;
    if let Some(calib_path) = &opt.calibration {
        let calib = CalibFile::load(&opt.detector, calib_path)
            .with_context(|| format!("loading calibration {calib_path}"))?;
        calib.apply(&mut config.hybrids)?;
        info!("Applied calibration from {calib_path}");
    }

    // The broker client behind the producer callback is an external
    // collaborator; here it only traces the handovers.
    let topic = opt
        .topic
        .clone()
        .unwrap_or_else(|| format!("{}_detector", opt.detector));
    info!("  Topic:        {topic}");
    let producer: ProducerCallback = Box::new(move |payload, timestamp| {
        debug!(
            "produce {} bytes to topic {topic} at {timestamp}",
            payload.len()
        );
    });

    let mut instrument = VmmInstrument::new(config, producer);
    let debug_topic = format!("{}_debug", opt.detector);
    instrument.set_debug_producer(
        Box::new(move |payload, _| {
            debug!("snapshot of {} raw bytes to topic {debug_topic}", payload.len());
        }),
        DEBUG_SNAPSHOT_INTERVAL,
    );
    if let Some(prefix) = &opt.dumpprefix {
        instrument.set_dump(PacketDump::create(prefix, &opt.detector)?);
    }

    let settings = DetectorSettings {
        detector_address: opt.rx_address.clone(),
        detector_port: opt.port,
        update_interval: Duration::from_secs(opt.updateinterval.max(1)),
        graphite_prefix: "efu".into(),
        graphite_region: opt.detector.clone(),
        input_cpu: opt.core_input,
        processing_cpu: opt.core_processing,
        ..Default::default()
    };
    let mut detector = Detector::new(settings)?;
    let stats = detector.register_stats(&instrument)?;

    let cancel = detector.cancel_token();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("Stop requested");
            cancel.cancel();
        })
        .context("installing signal handler")?;
    }
    if let Some(seconds) = opt.stopafter {
        let cancel = cancel.clone();
        std::thread::Builder::new()
            .name("stopafter".into())
            .spawn(move || {
                std::thread::sleep(Duration::from_secs(seconds));
                info!("Stopping after {seconds} s");
                cancel.cancel();
            })
            .map_err(|e| Error::Thread(e.to_string()))?;
    }

    detector.run(instrument)?;

    // Final counter report; shipping them to graphite is the scraper's job.
    for line in stats.report().lines() {
        info!("{line}");
    }
    Ok(())
}
