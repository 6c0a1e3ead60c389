//! # Transport Interface
//!
//! A transport moves slot-sized messages between the platform
//! microcontroller and the application processors over four directional
//! queues. The trait is the substitution point for tests and alternative
//! wire mechanisms; the one concrete implementation in this crate is the
//! shared-memory ring transport.

use crate::error::Result;
use crate::message::{Message, MSG_HDR_SIZE};

/// The four RPMI queue types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum QueueType {
    /// Application processor to platform: requests.
    A2pRequest = 0,
    /// Platform to application processor: acknowledgements.
    P2aAck = 1,
    /// Platform to application processor: requests.
    P2aRequest = 2,
    /// Application processor to platform: acknowledgements.
    A2pAck = 3,
}

impl QueueType {
    /// Number of queue types.
    pub const COUNT: usize = 4;

    /// All queue types in shared-memory layout order.
    pub const ALL: [QueueType; Self::COUNT] = [
        QueueType::A2pRequest,
        QueueType::P2aAck,
        QueueType::P2aRequest,
        QueueType::A2pAck,
    ];

    /// Whether this queue belongs to the optional P2A channel pair.
    pub fn is_p2a_pair(self) -> bool {
        matches!(self, QueueType::P2aRequest | QueueType::A2pAck)
    }
}

/// A message transport between the platform and application processors.
///
/// Enqueue and dequeue perform the endian conversion of header fields at
/// the boundary, so callers only ever deal in native integers. A full
/// queue on enqueue and an empty queue on dequeue both report
/// [`RpmiError::Io`](crate::RpmiError::Io), which callers treat as
/// back-pressure.
pub trait Transport: Send + Sync {
    /// Name of this transport instance.
    fn name(&self) -> &str;

    /// Whether multi-byte message fields are big-endian on the wire.
    fn is_be(&self) -> bool {
        false
    }

    /// Whether the P2A request / A2P ack queue pair exists.
    fn is_p2a_channel(&self) -> bool;

    /// Fixed slot size: header plus maximum payload.
    fn slot_size(&self) -> usize;

    /// Whether the given queue currently holds no messages.
    fn is_empty(&self, qtype: QueueType) -> bool;

    /// Whether the given queue cannot accept another message.
    fn is_full(&self, qtype: QueueType) -> bool;

    /// Append a message to the given queue.
    fn enqueue(&self, qtype: QueueType, msg: &Message) -> Result<()>;

    /// Remove the oldest message from the given queue.
    fn dequeue(&self, qtype: QueueType, out: &mut Message) -> Result<()>;

    /// Maximum payload length a slot can carry.
    fn max_data_len(&self) -> usize {
        self.slot_size() - MSG_HDR_SIZE
    }
}
