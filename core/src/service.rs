//! # Service Group Framework
//!
//! A service group is a namespaced collection of request handlers sharing
//! a version and a privilege policy. Groups are trait objects stored
//! uniformly by the context: static descriptor data, a services table
//! indexed by service ID, the request handler, and an optional event-tick
//! hook.
//!
//! Concrete groups hold their mutable state behind their own lock; the
//! framework guarantees a handler and the event tick never observe each
//! other mid-update because both go through that lock.

use bitflags::bitflags;

use crate::error::{Result, RpmiError};
use crate::message::{RequestReader, ResponseWriter, MSG_HDR_SIZE};

bitflags! {
    /// Privilege levels a service group admits, as a bitmap over
    /// [`PrivilegeLevel`] values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrivilegeFlags: u32 {
        /// Accessible from an S-mode context.
        const S_MODE = 1 << 0;
        /// Accessible from an M-mode context.
        const M_MODE = 1 << 1;
    }
}

/// RISC-V privilege level associated with a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PrivilegeLevel {
    /// Supervisor mode.
    S = 0,
    /// Machine mode.
    M = 1,
}

impl PrivilegeLevel {
    /// The bitmap bit corresponding to this level.
    pub fn mask(self) -> PrivilegeFlags {
        match self {
            PrivilegeLevel::S => PrivilegeFlags::S_MODE,
            PrivilegeLevel::M => PrivilegeFlags::M_MODE,
        }
    }
}

/// One entry of a group's services table, indexed by service ID.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSpec {
    /// Minimum request payload length for the handler to run.
    pub min_request_len: u16,
    /// Whether a handler exists; unimplemented entries are answered by
    /// the shared not-supported stub.
    pub implemented: bool,
}

impl ServiceSpec {
    /// A handled service with the given minimum request length.
    pub const fn new(min_request_len: u16) -> Self {
        Self {
            min_request_len,
            implemented: true,
        }
    }

    /// A table slot without a handler.
    pub const fn absent() -> Self {
        Self {
            min_request_len: 0,
            implemented: false,
        }
    }
}

/// Static descriptor of a service group.
#[derive(Debug, Clone, Copy)]
pub struct GroupInfo {
    /// Short name used in diagnostics.
    pub name: &'static str,
    /// Service group ID.
    pub group_id: u16,
    /// Group version in `major << 16 | minor` form.
    pub version: u32,
    /// Privilege levels admitted to this group.
    pub privilege: PrivilegeFlags,
    /// Services table indexed by service ID; the length bounds the valid
    /// service IDs.
    pub services: &'static [ServiceSpec],
}

impl GroupInfo {
    /// One past the highest valid service ID.
    pub fn max_service_id(&self) -> u8 {
        self.services.len() as u8
    }

    /// Table entry for `service_id`, if within range.
    pub fn service(&self, service_id: u8) -> Option<&ServiceSpec> {
        self.services.get(service_id as usize)
    }
}

/// A single request as seen by a group handler.
///
/// Carries the service ID, the request payload, and the transport
/// properties a handler needs to size and frame its reply.
#[derive(Debug, Clone, Copy)]
pub struct ServiceCall<'a> {
    /// Service ID from the request header.
    pub service_id: u8,
    /// Request payload bytes.
    pub data: &'a [u8],
    /// Wire endianness of payload words.
    pub is_be: bool,
    /// Transport slot size.
    pub slot_size: usize,
}

impl<'a> ServiceCall<'a> {
    /// Word-indexed reader over the request payload.
    pub fn reader(&self) -> RequestReader<'a> {
        RequestReader::new(self.data, self.is_be)
    }

    /// Maximum payload length a reply slot can carry.
    pub fn max_data_len(&self) -> usize {
        self.slot_size - MSG_HDR_SIZE
    }
}

/// A service group: static metadata, request dispatch, event tick.
pub trait ServiceGroup: Send + Sync {
    /// Static descriptor of this group.
    fn info(&self) -> &GroupInfo;

    /// Handle one request and frame the reply payload.
    ///
    /// Invoked only for implemented services whose minimum request length
    /// is satisfied; everything else is answered by the not-supported
    /// stub. An error return drops the request without acknowledgement.
    fn handle_request(&self, call: &ServiceCall<'_>, rsp: &mut ResponseWriter<'_>) -> Result<()>;

    /// Process pending events for this group: fast-channel writes,
    /// hardware state changes, pending injections. [`RpmiError::Busy`]
    /// means a sub-state is not yet satisfied and is expected.
    fn process_events(&self) -> Result<()> {
        Ok(())
    }

    /// Inject the P2A doorbell MSI.
    ///
    /// Implemented by the System-MSI group; the context invokes it
    /// through the trait so it needs no concrete-type dependency.
    fn inject_p2a_doorbell(&self) -> Result<()> {
        Err(RpmiError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_masks() {
        assert_eq!(PrivilegeLevel::S.mask().bits(), 0x1);
        assert_eq!(PrivilegeLevel::M.mask().bits(), 0x2);
        let both = PrivilegeFlags::S_MODE | PrivilegeFlags::M_MODE;
        assert!(both.contains(PrivilegeLevel::M.mask()));
    }

    #[test]
    fn group_info_service_lookup() {
        static SERVICES: &[ServiceSpec] = &[
            ServiceSpec::absent(),
            ServiceSpec::absent(),
            ServiceSpec::new(4),
        ];
        let info = GroupInfo {
            name: "test",
            group_id: 0x7C00,
            version: crate::version(1, 0),
            privilege: PrivilegeFlags::M_MODE,
            services: SERVICES,
        };
        assert_eq!(info.max_service_id(), 3);
        assert!(!info.service(1).unwrap().implemented);
        assert_eq!(info.service(2).unwrap().min_request_len, 4);
        assert!(info.service(3).is_none());
    }
}
