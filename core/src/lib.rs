//! # RPMI Messaging Core
//!
//! Platform-firmware side of the RISC-V Platform Management Interface
//! (RPMI) messaging protocol. A platform microcontroller serves requests
//! issued by application processors over shared-memory ring queues.
//!
//! This crate provides the transport-independent core:
//!
//! - Status codes shared by every layer ([`RpmiError`])
//! - The 8-byte message envelope and the endian boundary ([`message`])
//! - A bounds-checked shared-memory window ([`shmem`])
//! - The transport trait and the shared-memory ring transport
//!   ([`transport`], [`shmem_transport`])
//! - The service-group framework ([`service`])
//! - The context that binds a transport to a set of service groups and
//!   drives request dispatch ([`context`])
//!
//! Concrete service groups (reset, suspend, hart lifecycle, clocks, CPPC,
//! system MSI, ...) live in the companion `rpmi-groups` crate.
//!
//! ## Request flow
//!
//! The application processor writes a framed message into the A2P request
//! ring. The firmware mainloop polls [`context::Context::process_a2p_request`],
//! which decodes the header, routes to a service group by group ID, runs
//! the service handler under the group lock, and (for normal requests)
//! frames an acknowledgement into the P2A ack ring. Event ticks are fanned
//! out separately via `process_all_events`.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod context;
pub mod error;
pub mod message;
pub mod service;
pub mod shmem;
pub mod shmem_transport;
pub mod transport;

pub use context::{Context, ContextConfig};
pub use error::{Result, RpmiError};
pub use message::{Message, MessageHeader, MessageType};
pub use service::{
    GroupInfo, PrivilegeFlags, PrivilegeLevel, ServiceCall, ServiceGroup, ServiceSpec,
};
pub use shmem::{CacheOps, Shmem, ShmemOps};
pub use shmem_transport::{ShmemTransport, ShmemTransportConfig};
pub use transport::{QueueType, Transport};

/// RPMI specification version implemented by this library.
pub const SPEC_VERSION_MAJOR: u16 = 1;
/// RPMI specification minor version implemented by this library.
pub const SPEC_VERSION_MINOR: u16 = 0;

/// Implementation identifier reported by the base service group.
pub const IMPL_ID: u32 = 0;
/// Implementation major version.
pub const IMPL_VERSION_MAJOR: u16 = 0;
/// Implementation minor version.
pub const IMPL_VERSION_MINOR: u16 = 1;

/// Encode a `major.minor` pair into the RPMI `major << 16 | minor` form
/// used by version words on the wire.
pub const fn version(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | minor as u32
}

/// Encoded RPMI specification version.
pub const SPEC_VERSION: u32 = version(SPEC_VERSION_MAJOR, SPEC_VERSION_MINOR);
/// Encoded implementation version.
pub const IMPL_VERSION: u32 = version(IMPL_VERSION_MAJOR, IMPL_VERSION_MINOR);

/// Well-known service group identifiers.
pub mod group_id {
    /// Base service group (built into every context).
    pub const BASE: u16 = 0x0001;
    /// System MSI service group.
    pub const SYSTEM_MSI: u16 = 0x0002;
    /// System reset service group.
    pub const SYSTEM_RESET: u16 = 0x0003;
    /// System suspend service group.
    pub const SYSTEM_SUSPEND: u16 = 0x0004;
    /// Hart state management service group.
    pub const HSM: u16 = 0x0005;
    /// CPPC performance-hint service group.
    pub const CPPC: u16 = 0x0006;
    /// Voltage domain service group.
    pub const VOLTAGE: u16 = 0x0007;
    /// Clock tree service group.
    pub const CLOCK: u16 = 0x0008;
    /// Device power domain service group.
    pub const DEVICE_POWER: u16 = 0x0009;
    /// Performance domain service group.
    pub const PERFORMANCE: u16 = 0x000A;
    /// Management mode tunnel service group.
    pub const MANAGEMENT_MODE: u16 = 0x000B;
    /// RAS agent service group.
    pub const RAS_AGENT: u16 = 0x000C;
    /// Request forward service group.
    pub const REQUEST_FORWARD: u16 = 0x000D;

    /// First experimental service group ID.
    pub const EXPERIMENTAL_START: u16 = 0x7C00;
    /// Last experimental service group ID.
    pub const EXPERIMENTAL_END: u16 = 0x7FFF;
    /// First vendor-defined service group ID.
    pub const VENDOR_START: u16 = 0x8000;
}
