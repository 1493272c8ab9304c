//! UDP load generator producing artificial VMM3 readout packets.
//!
//! Counterpart to the hardware readout emulators: sends valid envelope +
//! payload packets at a configurable rate, optionally byte-fuzzed to
//! exercise the parser error paths.
use std::net::UdpSocket;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::Parser;
use log::info;

use efu::essheader::TYPE_VMM3;
use efu::generator::ReadoutGenerator;

#[derive(clap::Parser, Debug)]
#[command(version, about = "VMM3 readout packet generator")]
struct Opt {
    /// Destination IP address.
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    /// Destination UDP port.
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Number of packets to send; 0 means unlimited.
    #[arg(short = 'n', long, default_value = "100")]
    packets: u64,

    /// Readouts per packet.
    #[arg(short, long, default_value = "100")]
    readouts: u16,

    /// Logical rings to spread readouts over.
    #[arg(long, default_value = "2")]
    rings: u8,

    /// Microseconds to wait between packets.
    #[arg(short, long, default_value = "1000")]
    throttle: u64,

    /// Readout type byte.
    #[arg(long, default_value_t = TYPE_VMM3)]
    r#type: u8,

    /// Flip up to this many random bytes per packet.
    #[arg(long, default_value = "0")]
    fuzz: usize,

    /// Verbosity of debug messages.
    #[arg(short, default_value = "1")]
    verbose: usize,
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("efu")
        .verbosity(opt.verbose)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let target = format!("{}:{}", opt.address, opt.port);
    info!("Sending to {target}, {} readouts/packet", opt.readouts);

    let mut generator = ReadoutGenerator::new(opt.r#type, 0);
    let mut sent = 0u64;
    let mut sent_bytes = 0u64;
    while opt.packets == 0 || sent < opt.packets {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        generator.set_pulse(now, 0, now.saturating_sub(1), 0);
        generator.generate_track(opt.rings, opt.readouts, 50, 500);
        let mut packet = generator.packet();
        if opt.fuzz > 0 {
            ReadoutGenerator::fuzz(&mut packet, opt.fuzz);
        }
        sent_bytes += packet.len() as u64;
        socket.send_to(&packet, &target)?;
        sent += 1;
        if opt.throttle > 0 {
            std::thread::sleep(Duration::from_micros(opt.throttle));
        }
    }
    info!("Sent {sent} packets, {sent_bytes} bytes");
    Ok(())
}
