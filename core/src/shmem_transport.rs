//! # Shared-Memory Ring Transport
//!
//! The concrete transport: four ring queues laid out contiguously in one
//! shared-memory window, in the order A2P-request, P2A-ack, P2A-request,
//! A2P-ack. Each queue is a ring of fixed-size slots; slot 0 holds the
//! head index, slot 1 the tail index, slots 2..N-1 carry data. Head and
//! tail are little-endian in shared memory regardless of the message
//! endianness; the reader advances head, the writer advances tail.
//!
//! The A2P-request and P2A-ack queues share one size, the optional P2A
//! pair shares another. Passing a zero P2A queue size creates an
//! A2P-only channel.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{Result, RpmiError};
use crate::message::{Message, MSG_HDR_SIZE, SLOT_SIZE_MIN};
use crate::shmem::Shmem;
use crate::transport::{QueueType, Transport};

/// Minimum number of slots per queue (head + tail + at least two data).
pub const QUEUE_MIN_SLOTS: usize = 4;

/// Configuration for a shared-memory transport.
#[derive(Debug, Clone)]
pub struct ShmemTransportConfig {
    /// Name of the transport instance.
    pub name: String,
    /// Slot size in bytes; a power of two, at least 64.
    pub slot_size: usize,
    /// Size of the A2P request queue and the P2A ack queue, in bytes.
    pub a2p_req_queue_size: usize,
    /// Size of the P2A request queue and the A2P ack queue, in bytes.
    /// Zero means the P2A channel does not exist.
    pub p2a_req_queue_size: usize,
    /// Whether multi-byte message fields are big-endian on the wire.
    pub big_endian: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct QueueDesc {
    /// Byte offset of the queue within the shared memory.
    base: usize,
    /// Number of data slots (total slots minus the two index slots).
    data_slots: u32,
}

struct Scratch {
    slot: Vec<u8>,
}

/// Shared-memory ring transport.
pub struct ShmemTransport {
    name: String,
    slot_size: usize,
    is_be: bool,
    is_p2a_channel: bool,
    shmem: Arc<Shmem>,
    queues: [QueueDesc; QueueType::COUNT],
    /// Transport lock; also guards the slot scratch buffer.
    lock: Mutex<Scratch>,
}

impl core::fmt::Debug for ShmemTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShmemTransport")
            .field("name", &self.name)
            .field("slot_size", &self.slot_size)
            .field("is_p2a_channel", &self.is_p2a_channel)
            .finish()
    }
}

impl ShmemTransport {
    /// Create a shared-memory transport over `shmem`.
    ///
    /// Validates the slot size (power of two, at least 64 bytes), the
    /// queue sizes (multiples of the slot size, at least four slots), and
    /// that the shared memory can hold every active queue, then
    /// zero-fills the region so both sides start from empty rings.
    pub fn new(config: ShmemTransportConfig, shmem: Arc<Shmem>) -> Result<Self> {
        let slot_size = config.slot_size;
        if slot_size < SLOT_SIZE_MIN || !slot_size.is_power_of_two() {
            return Err(RpmiError::InvalidParam);
        }

        let check_queue_size = |size: usize| -> Result<()> {
            if size % slot_size != 0 || size < QUEUE_MIN_SLOTS * slot_size {
                return Err(RpmiError::InvalidParam);
            }
            Ok(())
        };

        check_queue_size(config.a2p_req_queue_size)?;
        let is_p2a_channel = config.p2a_req_queue_size != 0;
        if is_p2a_channel {
            check_queue_size(config.p2a_req_queue_size)?;
        }

        let total = 2 * config.a2p_req_queue_size + 2 * config.p2a_req_queue_size;
        if total > shmem.size() {
            return Err(RpmiError::InvalidParam);
        }

        shmem.fill(0, 0, shmem.size())?;

        // Queues are contiguous: A2P-REQ, P2A-ACK, P2A-REQ, A2P-ACK.
        let sizes = [
            config.a2p_req_queue_size,
            config.a2p_req_queue_size,
            config.p2a_req_queue_size,
            config.p2a_req_queue_size,
        ];
        let mut queues = [QueueDesc::default(); QueueType::COUNT];
        let mut base = 0;
        for (queue, size) in queues.iter_mut().zip(sizes) {
            *queue = QueueDesc {
                base,
                data_slots: (size / slot_size).saturating_sub(2) as u32,
            };
            base += size;
        }

        Ok(Self {
            name: config.name,
            slot_size,
            is_be: config.big_endian,
            is_p2a_channel,
            shmem,
            queues,
            lock: Mutex::new(Scratch {
                slot: vec![0u8; slot_size],
            }),
        })
    }

    /// The shared memory backing this transport.
    pub fn shmem(&self) -> &Arc<Shmem> {
        &self.shmem
    }

    fn check_qtype(&self, qtype: QueueType) -> Result<()> {
        if qtype.is_p2a_pair() && !self.is_p2a_channel {
            log::debug!("{}: p2a channel not available", self.name);
            return Err(RpmiError::InvalidParam);
        }
        Ok(())
    }

    fn head_offset(&self, qtype: QueueType) -> usize {
        self.queues[qtype as usize].base
    }

    fn tail_offset(&self, qtype: QueueType) -> usize {
        self.queues[qtype as usize].base + self.slot_size
    }

    fn read_head(&self, qtype: QueueType) -> Result<u32> {
        self.shmem.read_u32_le(self.head_offset(qtype))
    }

    fn read_tail(&self, qtype: QueueType) -> Result<u32> {
        self.shmem.read_u32_le(self.tail_offset(qtype))
    }

    fn data_slot_offset(&self, qtype: QueueType, index: u32) -> usize {
        self.queues[qtype as usize].base + (index as usize + 2) * self.slot_size
    }

    /// Caller holds the transport lock.
    fn queue_is_empty(&self, qtype: QueueType) -> Result<bool> {
        Ok(self.read_head(qtype)? == self.read_tail(qtype)?)
    }

    /// Caller holds the transport lock.
    fn queue_is_full(&self, qtype: QueueType) -> Result<bool> {
        let head = self.read_head(qtype)?;
        let tail = self.read_tail(qtype)?;
        let data_slots = self.queues[qtype as usize].data_slots;
        Ok((tail + 1) % data_slots == head)
    }
}

impl Transport for ShmemTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_be(&self) -> bool {
        self.is_be
    }

    fn is_p2a_channel(&self) -> bool {
        self.is_p2a_channel
    }

    fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn is_empty(&self, qtype: QueueType) -> bool {
        if self.check_qtype(qtype).is_err() {
            return true;
        }
        let _guard = self.lock.lock();
        self.queue_is_empty(qtype).unwrap_or(true)
    }

    fn is_full(&self, qtype: QueueType) -> bool {
        if self.check_qtype(qtype).is_err() {
            return true;
        }
        let _guard = self.lock.lock();
        self.queue_is_full(qtype).unwrap_or(true)
    }

    fn enqueue(&self, qtype: QueueType, msg: &Message) -> Result<()> {
        self.check_qtype(qtype)?;
        if msg.header.datalen as usize > self.slot_size - MSG_HDR_SIZE {
            return Err(RpmiError::InvalidParam);
        }

        let mut scratch = self.lock.lock();
        if self.queue_is_full(qtype)? {
            log::debug!("{}: queue {:?} full", self.name, qtype);
            return Err(RpmiError::Io);
        }

        let tail = self.read_tail(qtype)?;
        msg.encode_into(self.is_be, &mut scratch.slot);
        self.shmem
            .write(self.data_slot_offset(qtype, tail), &scratch.slot)?;

        let data_slots = self.queues[qtype as usize].data_slots;
        self.shmem
            .write_u32_le(self.tail_offset(qtype), (tail + 1) % data_slots)
    }

    fn dequeue(&self, qtype: QueueType, out: &mut Message) -> Result<()> {
        self.check_qtype(qtype)?;

        let mut scratch = self.lock.lock();
        if self.queue_is_empty(qtype)? {
            return Err(RpmiError::Io);
        }

        let head = self.read_head(qtype)?;
        self.shmem
            .read(self.data_slot_offset(qtype, head), &mut scratch.slot)?;
        out.decode_from(self.is_be, &scratch.slot);

        let data_slots = self.queues[qtype as usize].data_slots;
        self.shmem
            .write_u32_le(self.head_offset(qtype), (head + 1) % data_slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use alloc::format;

    fn transport(slot_size: usize, queue_size: usize, p2a: bool, be: bool) -> ShmemTransport {
        let total = if p2a { 4 * queue_size } else { 2 * queue_size };
        let shmem = Arc::new(Shmem::heap("xfer", total).unwrap());
        ShmemTransport::new(
            ShmemTransportConfig {
                name: String::from("test"),
                slot_size,
                a2p_req_queue_size: queue_size,
                p2a_req_queue_size: if p2a { queue_size } else { 0 },
                big_endian: be,
            },
            shmem,
        )
        .unwrap()
    }

    fn request(token: u16, payload: &[u8], slot_size: usize) -> Message {
        let mut msg = Message::new(slot_size);
        msg.header = crate::message::MessageHeader::request(
            0x0001,
            0x04,
            MessageType::NormalRequest,
            token,
        );
        msg.set_payload(payload).unwrap();
        msg
    }

    #[test]
    fn construction_validation() {
        let shmem = Arc::new(Shmem::heap("cfg", 4096).unwrap());
        let config = |slot: usize, a2p: usize, p2a: usize| ShmemTransportConfig {
            name: String::from("cfg"),
            slot_size: slot,
            a2p_req_queue_size: a2p,
            p2a_req_queue_size: p2a,
            big_endian: false,
        };

        // Slot size not a power of two, or below the minimum.
        assert!(ShmemTransport::new(config(96, 1024, 0), shmem.clone()).is_err());
        assert!(ShmemTransport::new(config(32, 1024, 0), shmem.clone()).is_err());
        // Queue size not a multiple of the slot size.
        assert!(ShmemTransport::new(config(64, 1000, 0), shmem.clone()).is_err());
        // Queue below four slots.
        assert!(ShmemTransport::new(config(64, 128, 0), shmem.clone()).is_err());
        // Queues exceed the shared memory.
        assert!(ShmemTransport::new(config(64, 4096, 0), shmem.clone()).is_err());

        let trans = ShmemTransport::new(config(64, 1024, 0), shmem.clone()).unwrap();
        assert!(!trans.is_p2a_channel());
        let trans = ShmemTransport::new(config(64, 1024, 1024), shmem).unwrap();
        assert!(trans.is_p2a_channel());
    }

    #[test]
    fn empty_and_full_track_ring_indices() {
        let trans = transport(64, 4 * 64, false, false);
        assert!(trans.is_empty(QueueType::A2pRequest));
        assert!(!trans.is_full(QueueType::A2pRequest));

        // A four-slot queue has two data slots, so one message fills it.
        let msg = request(1, &[], 64);
        trans.enqueue(QueueType::A2pRequest, &msg).unwrap();
        assert!(!trans.is_empty(QueueType::A2pRequest));
        assert!(trans.is_full(QueueType::A2pRequest));
        assert_eq!(
            trans.enqueue(QueueType::A2pRequest, &msg),
            Err(RpmiError::Io)
        );

        let mut out = Message::new(64);
        trans.dequeue(QueueType::A2pRequest, &mut out).unwrap();
        assert!(trans.is_empty(QueueType::A2pRequest));
        assert_eq!(
            trans.dequeue(QueueType::A2pRequest, &mut out),
            Err(RpmiError::Io)
        );
    }

    #[test]
    fn fifo_order_preserved_across_wraparound() {
        for &slot_size in &[64usize, 128, 256, 512, 1024] {
            let trans = transport(slot_size, 8 * slot_size, false, false);
            let mut next_in = 0u16;
            let mut next_out = 0u16;

            // Interleave bursts so the ring wraps several times; an
            // eight-slot queue holds at most five messages at once.
            for burst in 1..=5usize {
                for _ in 0..burst {
                    let payload = format!("payload-{next_in}");
                    let msg = request(next_in, payload.as_bytes(), slot_size);
                    trans.enqueue(QueueType::A2pRequest, &msg).unwrap();
                    next_in += 1;
                }
                let mut out = Message::new(slot_size);
                while trans.dequeue(QueueType::A2pRequest, &mut out).is_ok() {
                    assert_eq!(out.header.token, next_out);
                    let expect = format!("payload-{next_out}");
                    assert_eq!(out.payload(), expect.as_bytes());
                    next_out += 1;
                }
                assert_eq!(next_in, next_out);
            }
        }
    }

    #[test]
    fn endian_conversion_is_identity_for_handlers() {
        for &be in &[false, true] {
            let trans = transport(64, 4 * 64, false, be);
            let msg = request(0x1234, &[9, 8, 7], 64);
            trans.enqueue(QueueType::A2pRequest, &msg).unwrap();

            let mut out = Message::new(64);
            trans.dequeue(QueueType::A2pRequest, &mut out).unwrap();
            assert_eq!(out.header, msg.header);
            assert_eq!(out.payload(), msg.payload());
        }
    }

    #[test]
    fn ring_indices_stay_little_endian_when_messages_are_be() {
        let trans = transport(64, 4 * 64, false, true);
        let msg = request(0, &[], 64);
        trans.enqueue(QueueType::A2pRequest, &msg).unwrap();
        // Tail index lives in slot 1 and must read back as LE 1.
        assert_eq!(trans.shmem().read_u32_le(64).unwrap(), 1);
    }

    #[test]
    fn p2a_queues_rejected_without_channel() {
        let trans = transport(64, 4 * 64, false, false);
        let msg = request(0, &[], 64);
        assert_eq!(
            trans.enqueue(QueueType::P2aRequest, &msg),
            Err(RpmiError::InvalidParam)
        );
        let mut out = Message::new(64);
        assert_eq!(
            trans.dequeue(QueueType::A2pAck, &mut out),
            Err(RpmiError::InvalidParam)
        );
        assert!(trans.is_empty(QueueType::P2aRequest));
        assert!(trans.is_full(QueueType::P2aRequest));
    }

    #[test]
    fn queues_are_placed_contiguously() {
        let trans = transport(64, 4 * 64, true, false);
        let msg = request(7, &[1], 64);
        trans.enqueue(QueueType::A2pAck, &msg).unwrap();
        // A2P-ACK is the fourth queue; its tail slot sits at
        // 3 * queue_size + slot_size.
        assert_eq!(trans.shmem().read_u32_le(3 * 256 + 64).unwrap(), 1);
    }
}
