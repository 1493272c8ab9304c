/*! ev44 event message serialization.

Accumulates `(time-of-flight, pixel-id)` pairs and publishes them as an
`ev44` flatbuffer message through a producer callback. A message is
produced when the pulse reference changes, when the event capacity is
reached, or when the periodic timer in the processing loop fires.

The message layout is packed by hand for the one fixed table this crate
emits:

```text
root:u32 "ev44" | vtable | Event44Message table |
source_name | reference_time_index:[i32] | time_of_flight:[i32] | pixel_id:[i32]
```

Field ids: source_name(0), message_id(1), reference_time(2),
reference_time_index(3), time_of_flight(4), pixel_id(5).
*/
use crate::stats::Counter;

/// Flatbuffer file identifier of the schema.
pub const FILE_ID: &[u8; 4] = b"ev44";

// Fixed object positions; the table holds two 8-byte scalars and four
// forward offsets, the vtable covers all six fields.
const TABLE_POS: u32 = 28;
const VTABLE_POS: u32 = 8;
const VTABLE_LEN: u16 = 16;
const TABLE_LEN: u16 = 36;
const STRING_POS: u32 = 64;
// Field offsets within the table, in field id order.
const VOFFSETS: [u16; 6] = [20, 4, 12, 24, 28, 32];

/// Callback handing a finished message and its timestamp (ms) to the
/// broker client.
pub type ProducerCallback = Box<dyn FnMut(&[u8], i64) + Send>;

/// Serializer counters.
#[derive(Clone, Default)]
pub struct SerializerCounters {
    /// Messages produced because the pulse reference changed.
    pub produce_cause_pulse_change: Counter,
    /// Messages produced because the event capacity was reached.
    pub produce_cause_max_events: Counter,
    /// Messages produced by the periodic timer.
    pub produce_cause_timeout: Counter,
    /// Calls to produce, including empty no-ops.
    pub produce_calls: Counter,
    /// Bytes handed to the producer callback.
    pub tx_bytes: Counter,
}

/// Accumulates events into ev44 messages.
pub struct Ev44Serializer {
    max_events: usize,
    source_name: String,
    message_id: u64,
    reference_time: i64,
    tofs: Vec<i32>,
    pixels: Vec<i32>,
    buffer: Vec<u8>,
    producer: ProducerCallback,
    /// Counter block.
    pub counters: SerializerCounters,
}

impl Ev44Serializer {
    /// Serializer holding up to `max_events` events per message for
    /// `source_name`.
    #[must_use]
    pub fn new(max_events: usize, source_name: &str, producer: ProducerCallback) -> Self {
        assert!(max_events > 0);
        Self {
            max_events,
            source_name: source_name.to_string(),
            message_id: 1,
            reference_time: 0,
            tofs: Vec::with_capacity(max_events),
            pixels: Vec::with_capacity(max_events),
            buffer: Vec::with_capacity(message_size(source_name.len(), max_events)),
            producer,
            counters: SerializerCounters::default(),
        }
    }

    /// Currently set reference time in ns.
    #[must_use]
    pub fn reference_time(&self) -> i64 {
        self.reference_time
    }

    /// Events buffered for the open message.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.tofs.len()
    }

    /// Message id the open message will carry.
    #[must_use]
    pub fn current_message_id(&self) -> u64 {
        self.message_id
    }

    /// Adopt a new reference time, first producing the open message if the
    /// reference actually changes. Returns bytes transmitted, if any.
    pub fn check_and_set_reference_time(&mut self, time_ns: i64) -> usize {
        if time_ns == self.reference_time {
            return 0;
        }
        let mut tx = 0;
        if !self.tofs.is_empty() {
            self.counters.produce_cause_pulse_change.inc();
            tx = self.produce();
        }
        self.reference_time = time_ns;
        tx
    }

    /// Append one event. Produces the message when the capacity is
    /// reached. Returns bytes transmitted, if any.
    pub fn add_event(&mut self, tof_ns: i32, pixel: i32) -> usize {
        self.tofs.push(tof_ns);
        self.pixels.push(pixel);
        if self.tofs.len() >= self.max_events {
            self.counters.produce_cause_max_events.inc();
            return self.produce();
        }
        0
    }

    /// Serialize the open message and hand it to the producer with the
    /// reference time (ms) as the message timestamp. Safe to call with no
    /// events buffered; that is a counted no-op. Returns bytes sent.
    pub fn produce(&mut self) -> usize {
        self.counters.produce_calls.inc();
        if self.tofs.is_empty() {
            return 0;
        }
        serialize_into(
            &mut self.buffer,
            &self.source_name,
            self.message_id,
            self.reference_time,
            &self.tofs,
            &self.pixels,
        );
        let bytes = self.buffer.len();
        (self.producer)(&self.buffer, self.reference_time / 1_000_000);
        self.counters.tx_bytes.add(bytes as i64);
        self.message_id += 1;
        self.tofs.clear();
        self.pixels.clear();
        bytes
    }

    /// Serialize the open message without producing it. Test hook.
    #[must_use]
    pub fn serialize(&mut self) -> &[u8] {
        serialize_into(
            &mut self.buffer,
            &self.source_name,
            self.message_id,
            self.reference_time,
            &self.tofs,
            &self.pixels,
        );
        &self.buffer
    }
}

fn message_size(name_len: usize, events: usize) -> usize {
    // Fixed part + padded string + three vectors.
    STRING_POS as usize + (4 + name_len + 1 + 3) / 4 * 4 + 8 + 2 * (4 + 4 * events)
}

fn serialize_into(
    buf: &mut Vec<u8>,
    source_name: &str,
    message_id: u64,
    reference_time: i64,
    tofs: &[i32],
    pixels: &[i32],
) {
    debug_assert_eq!(tofs.len(), pixels.len());
    buf.clear();

    let str_end = STRING_POS as usize + 4 + source_name.len() + 1;
    let rti_pos = ((str_end + 3) & !3) as u32;
    let tof_pos = rti_pos + 8;
    let pix_pos = tof_pos + 4 + 4 * tofs.len() as u32;

    buf.extend_from_slice(&TABLE_POS.to_le_bytes());
    buf.extend_from_slice(FILE_ID);

    // vtable
    buf.extend_from_slice(&VTABLE_LEN.to_le_bytes());
    buf.extend_from_slice(&TABLE_LEN.to_le_bytes());
    for voff in VOFFSETS {
        buf.extend_from_slice(&voff.to_le_bytes());
    }
    buf.extend_from_slice(&[0u8; 4]); // table alignment

    // table: signed offset back to the vtable, scalars, forward offsets
    buf.extend_from_slice(&(TABLE_POS as i32 - VTABLE_POS as i32).to_le_bytes());
    buf.extend_from_slice(&message_id.to_le_bytes());
    buf.extend_from_slice(&reference_time.to_le_bytes());
    buf.extend_from_slice(&(STRING_POS - (TABLE_POS + 20)).to_le_bytes());
    buf.extend_from_slice(&(rti_pos - (TABLE_POS + 24)).to_le_bytes());
    buf.extend_from_slice(&(tof_pos - (TABLE_POS + 28)).to_le_bytes());
    buf.extend_from_slice(&(pix_pos - (TABLE_POS + 32)).to_le_bytes());
    debug_assert_eq!(buf.len(), STRING_POS as usize);

    // source_name, nul-terminated, padded to vector alignment
    buf.extend_from_slice(&(source_name.len() as u32).to_le_bytes());
    buf.extend_from_slice(source_name.as_bytes());
    buf.push(0);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
    debug_assert_eq!(buf.len(), rti_pos as usize);

    // reference_time_index: one reference, all events index it
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes());

    buf.extend_from_slice(&(tofs.len() as u32).to_le_bytes());
    for v in tofs {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf.extend_from_slice(&(pixels.len() as u32).to_le_bytes());
    for v in pixels {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

/// Decoded ev44 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ev44Message {
    /// Producer source name.
    pub source_name: String,
    /// Monotonic message id.
    pub message_id: u64,
    /// Reference (pulse) time in ns.
    pub reference_time: i64,
    /// Per-event index into the reference time list.
    pub reference_time_index: Vec<i32>,
    /// Event times of flight.
    pub time_of_flight: Vec<i32>,
    /// Event pixel ids.
    pub pixel_id: Vec<i32>,
}

impl Ev44Message {
    /// Decode a serialized message. Returns `None` on malformed input.
    ///
    /// Follows the vtable, so it also reads buffers from other ev44
    /// producers.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let table = read_u32(buf, 0)? as usize;
        if buf.get(4..8)? != FILE_ID {
            return None;
        }
        let soffset = read_u32(buf, table)? as i32;
        let vtable = (table as i64 - i64::from(soffset)) as usize;
        let vlen = usize::from(read_u16(buf, vtable)?);

        let field = |id: usize| -> Option<usize> {
            let slot = vtable + 4 + 2 * id;
            if slot + 2 > vtable + vlen {
                return None;
            }
            match read_u16(buf, slot)? {
                0 => None,
                off => Some(table + usize::from(off)),
            }
        };
        let indirect = |pos: usize| -> Option<usize> { Some(pos + read_u32(buf, pos)? as usize) };
        let vec_i32 = |pos: usize| -> Option<Vec<i32>> {
            let pos = indirect(pos)?;
            let n = read_u32(buf, pos)? as usize;
            let mut v = Vec::with_capacity(n);
            for i in 0..n {
                v.push(read_u32(buf, pos + 4 + 4 * i)? as i32);
            }
            Some(v)
        };

        let name_pos = indirect(field(0)?)?;
        let name_len = read_u32(buf, name_pos)? as usize;
        let source_name =
            String::from_utf8(buf.get(name_pos + 4..name_pos + 4 + name_len)?.to_vec()).ok()?;
        let mid_pos = field(1)?;
        let message_id = u64::from(read_u32(buf, mid_pos)?)
            | (u64::from(read_u32(buf, mid_pos + 4)?) << 32);
        let rt_pos = field(2)?;
        let reference_time = (u64::from(read_u32(buf, rt_pos)?)
            | (u64::from(read_u32(buf, rt_pos + 4)?) << 32)) as i64;

        Some(Self {
            source_name,
            message_id,
            reference_time,
            reference_time_index: vec_i32(field(3)?)?,
            time_of_flight: vec_i32(field(4)?)?,
            pixel_id: vec_i32(field(5)?)?,
        })
    }
}

fn read_u16(buf: &[u8], pos: usize) -> Option<u16> {
    Some(u16::from_le_bytes(buf.get(pos..pos + 2)?.try_into().ok()?))
}

fn read_u32(buf: &[u8], pos: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(pos..pos + 4)?.try_into().ok()?))
}
