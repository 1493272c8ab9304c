#![warn(missing_docs)]
/*! Event formation unit for ESS-style neutron detector readout.

An EFU instance ingests raw UDP readout packets from a neutron scattering
instrument, reconstructs neutron hit positions in real time, and publishes
per-event `(time-of-flight, pixel-id)` records onto a message broker.

# Architecture overview

Each detector instance runs two cooperating threads connected by a bounded
lock-free ring of fixed-size packet buffers:

```text
        [ UDP ingress thread ]
                 ↓ PacketRing + SlotFifo (slot indices)
        [ processing thread ]
        envelope parse → VMM3 parse → calibration →
        per-plane gap clustering → cross-plane matching →
        filters → pixel mapping → ev44 serialization
                 ↓
        [ broker producer callback ]
```

The ingress thread ([`socket::UdpReceiver`]) writes each datagram into the
next slot of the packet ring ([`ring`]) and publishes the slot index
through the SPSC queue ([`fifo`]). The processing thread pops indices,
validates the ESS
readout envelope ([`essheader::Parser`]), parses VMM3 readout records
([`vmm3::Vmm3Parser`]), and feeds calibrated hits through per-hybrid
[`builder::EventBuilder`]s. Matched events pass the gap and time-of-flight
filters and end up in the [`ev44::Ev44Serializer`], which hands finished
messages to the broker callback.

Every stage exposes its health through named 64-bit counters registered in a
[`stats::Statistics`] fabric, read lock-free by an external telemetry
scraper.
*/

pub mod builder;
pub mod calibration;
pub mod cluster;
pub mod config;
pub mod detector;
pub mod dump;
pub mod essheader;
pub mod esstime;
pub mod ev44;
pub mod fifo;
pub mod generator;
pub mod geometry;
pub mod hwcheck;
pub mod hybrid;
pub mod instrument;
pub mod matcher;
pub mod ring;
pub mod runtimestat;
pub mod socket;
pub mod stats;
pub mod vmm3;

/// Largest datagram a packet slot can hold. Sized for jumbo frames.
pub const MAX_UDP_PAYLOAD: usize = 9000;

/// EFU error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure (socket, dump file, config file).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse failure in a config or calibration file.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Semantic error in the instrument configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Semantic error in a calibration file.
    #[error("invalid calibration: {0}")]
    Calibration(String),

    /// Counter fabric registration error.
    #[error("duplicate stat: {0}")]
    DuplicateStat(String),

    /// Hardware precondition (MTU) not met.
    #[error("hardware check failed: {0}")]
    HwCheck(String),

    /// Thread spawn/join failure.
    #[error("thread error: {0}")]
    Thread(String),
}

/// EFU result type.
pub type Result<T> = std::result::Result<T, Error>;
