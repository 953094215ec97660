//! # Packet Stream
//!
//! Length-prefixed framing over a [`RingBuffer`]. The frame header is
//! itself a record of `{size: Uint32, bytes: Bytes}`: the 4-byte size
//! word plus the payload's 4-byte offset slot give the fixed 8-byte
//! header, and `size` counts the whole packet from its first header
//! byte.
//!
//! One header record and one read buffer are reused across calls, so
//! framing allocates only when a payload outgrows what came before.

use eyre::{ensure, Result};
use std::sync::Arc;

use crate::config::PACKET_HEADER_BYTES;
use crate::records::{FieldDef, Record, Schema};
use crate::ring::buffer::RingBuffer;
use crate::types::{FieldType, Value};

fn packet_schema() -> Result<Arc<Schema>> {
    Schema::intern(
        Some("Packet"),
        vec![
            FieldDef::new("size", FieldType::Uint32),
            FieldDef::new("bytes", FieldType::Bytes),
        ],
    )
}

#[derive(Debug)]
pub struct PacketStream {
    ring: RingBuffer,
    header: Record,
    read_buf: Vec<u8>,
}

impl PacketStream {
    pub fn new(ring: RingBuffer) -> Result<PacketStream> {
        let schema = packet_schema()?;
        Ok(PacketStream {
            ring,
            header: Record::new(&schema),
            read_buf: Vec::new(),
        })
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Rebuilds the reusable header record around `payload`.
    fn frame(&mut self, payload: &[u8]) -> Result<()> {
        self.header.set_bytes("bytes", payload)?;
        let total = self.header.as_bytes().len();
        self.header.set("size", &Value::U32(total as u32))?;
        Ok(())
    }

    /// Frames `payload` and issues a single ring write. False when the
    /// ring has no room right now.
    pub fn try_write(&mut self, payload: &[u8]) -> Result<bool> {
        self.frame(payload)?;
        Ok(self.ring.try_write(self.header.as_bytes()) > 0)
    }

    /// Blocking write; false once the timeout elapses.
    pub fn write(&mut self, payload: &[u8], timeout_ms: u64) -> Result<bool> {
        self.frame(payload)?;
        Ok(self.ring.write(self.header.as_bytes(), timeout_ms) > 0)
    }

    /// Pops one packet and returns its payload, or None when no complete
    /// packet is available (including losing a read race).
    pub fn try_read(&mut self) -> Result<Option<&[u8]>> {
        if !self.fetch()? {
            return Ok(None);
        }
        Ok(Some(&self.read_buf[PACKET_HEADER_BYTES..]))
    }

    /// Blocking read; None once the timeout elapses.
    pub fn read(&mut self, timeout_ms: u64) -> Result<Option<&[u8]>> {
        use std::time::{Duration, Instant};

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.fetch()? {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let tail = self.ring.tail_condvar().value();
            self.ring
                .tail_condvar()
                .wait(tail, Some(deadline.duration_since(now)));
        }
        Ok(Some(&self.read_buf[PACKET_HEADER_BYTES..]))
    }

    /// Reads the next packet into the reusable buffer. False when no
    /// complete packet could be taken.
    fn fetch(&mut self) -> Result<bool> {
        let mut size_bytes = [0u8; 4];
        if self.ring.scan(&mut size_bytes) == 0 {
            return Ok(false);
        }
        let size = u32::from_le_bytes(size_bytes) as usize;
        ensure!(
            size >= PACKET_HEADER_BYTES,
            "corrupt packet frame: size {} is below the {}-byte header",
            size,
            PACKET_HEADER_BYTES
        );
        self.read_buf.resize(size, 0);
        // A packet is written with one ring write, so once the size word
        // is visible the whole frame is. A zero here means another
        // reader won the race for it.
        Ok(self.ring.try_read(&mut self.read_buf) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RING_META_BYTES;
    use crate::ring::region::SharedRegion;

    fn stream(data_bytes: usize) -> PacketStream {
        let region = SharedRegion::alloc(RING_META_BYTES + data_bytes);
        PacketStream::new(RingBuffer::new(&region, 0).unwrap()).unwrap()
    }

    #[test]
    fn payload_round_trips_through_the_ring() {
        let mut stream = stream(64);
        assert!(stream.try_write(b"hello packets").unwrap());
        let payload = stream.try_read().unwrap().expect("one packet queued");
        assert_eq!(payload, b"hello packets");
        assert!(stream.try_read().unwrap().is_none());
    }

    #[test]
    fn size_word_counts_the_whole_frame() {
        let mut stream = stream(64);
        assert!(stream.try_write(b"abc").unwrap());
        let mut size_bytes = [0u8; 4];
        assert_eq!(stream.ring().scan(&mut size_bytes), 4);
        assert_eq!(u32::from_le_bytes(size_bytes), 8 + 3);
    }

    #[test]
    fn packets_keep_their_boundaries() {
        let mut stream = stream(128);
        for payload in [b"one".as_slice(), b"second".as_slice(), b"".as_slice()] {
            assert!(stream.try_write(payload).unwrap());
        }
        assert_eq!(stream.try_read().unwrap().unwrap(), b"one");
        assert_eq!(stream.try_read().unwrap().unwrap(), b"second");
        assert_eq!(stream.try_read().unwrap().unwrap(), b"");
        assert!(stream.try_read().unwrap().is_none());
    }

    #[test]
    fn oversized_packets_are_refused() {
        let mut stream = stream(16);
        assert!(!stream.try_write(&[0u8; 32]).unwrap());
    }

    #[test]
    fn blocking_read_times_out_clean() {
        let mut stream = stream(64);
        assert!(stream.read(20).unwrap().is_none());
        assert!(stream.write(b"x", 20).unwrap());
        assert_eq!(stream.read(20).unwrap().unwrap(), b"x");
    }
}
