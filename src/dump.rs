/*! Raw packet dump files.

With `--dumpprefix` set, every received packet is appended to a dump file
as a length-prefixed record, giving an exact replayable capture of what
arrived on the wire.
*/
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::Result;

/// Writer for length-prefixed raw packet records.
pub struct PacketDump {
    path: PathBuf,
    writer: BufWriter<File>,
    packets: u64,
}

impl PacketDump {
    /// Create `<prefix><name>_<unix time>.dat`.
    pub fn create(prefix: &str, name: &str) -> Result<Self> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = PathBuf::from(format!("{prefix}{name}_{stamp}.dat"));
        info!("Creating packet dump file {}", path.display());
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            writer,
            packets: 0,
        })
    }

    /// Append one packet record.
    pub fn push(&mut self, packet: &[u8]) -> Result<()> {
        self.writer
            .write_all(&(packet.len() as u32).to_le_bytes())?;
        self.writer.write_all(packet)?;
        self.packets += 1;
        Ok(())
    }

    /// Packets written so far.
    #[must_use]
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Flush buffered records to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Path of the dump file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for PacketDump {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
