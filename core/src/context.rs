//! # Context and Request Dispatch
//!
//! A context binds one transport to a set of service groups and drives
//! the request-processing loop. The Base service group is built in and
//! always present; further groups are added and removed at runtime,
//! subject to the context's capacity and privilege level.
//!
//! Lock order is context groups lock, then a group's own lock, then the
//! transport lock. The groups lock is never held across a handler or an
//! event tick.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{Result, RpmiError, STATUS_SUCCESS};
use crate::group_id;
use crate::message::{Message, MessageType, ResponseWriter};
use crate::service::{
    GroupInfo, PrivilegeFlags, PrivilegeLevel, ServiceCall, ServiceGroup, ServiceSpec,
};
use crate::transport::{QueueType, Transport};

/// Base service group service IDs.
pub mod base_service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// Report the implementation version.
    pub const GET_IMPLEMENTATION_VERSION: u8 = 0x02;
    /// Report the implementation identifier.
    pub const GET_IMPLEMENTATION_IDN: u8 = 0x03;
    /// Report the implemented specification version.
    pub const GET_SPEC_VERSION: u8 = 0x04;
    /// Report the platform information string.
    pub const GET_PLATFORM_INFO: u8 = 0x05;
    /// Probe for a service group by ID.
    pub const PROBE_SERVICE_GROUP: u8 = 0x06;
    /// Report base attributes.
    pub const GET_ATTRIBUTES: u8 = 0x07;
}

/// Privilege flag reported by Base GET_ATTRIBUTES for M-mode contexts.
const BASE_FLAGS_F0_PRIVILEGE: u32 = 1 << 1;

/// Configuration for creating a [`Context`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Name of the context instance.
    pub name: String,
    /// Maximum number of service groups, including the built-in Base.
    pub max_num_groups: usize,
    /// Privilege level of this context.
    pub privilege_level: PrivilegeLevel,
    /// Platform information string served by Base GET_PLATFORM_INFO.
    pub plat_info: String,
}

#[derive(Default)]
struct GroupTable {
    groups: Vec<Arc<dyn ServiceGroup>>,
    /// Cached System-MSI group used for doorbell injection.
    sysmsi: Option<Arc<dyn ServiceGroup>>,
}

/// State shared between the context and its built-in Base group.
struct Shared {
    privilege: PrivilegeLevel,
    plat_info: Vec<u8>,
    table: Mutex<GroupTable>,
}

struct Scratch {
    req: Message,
    ack: Message,
}

/// An RPMI execution context.
pub struct Context {
    name: String,
    transport: Arc<dyn Transport>,
    max_num_groups: usize,
    shared: Arc<Shared>,
    scratch: Mutex<Scratch>,
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("max_num_groups", &self.max_num_groups)
            .finish()
    }
}

impl Context {
    /// Create a context over `transport` and add the built-in Base group.
    pub fn new(config: ContextConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        if config.max_num_groups == 0 {
            return Err(RpmiError::InvalidParam);
        }

        let slot_size = transport.slot_size();
        let mut plat_info = Vec::from(config.plat_info.as_bytes());
        // Bound so that status + length + string fit one reply slot.
        plat_info.truncate(transport.max_data_len().saturating_sub(8));

        let shared = Arc::new(Shared {
            privilege: config.privilege_level,
            plat_info,
            table: Mutex::new(GroupTable::default()),
        });

        let cntx = Self {
            name: config.name,
            transport,
            max_num_groups: config.max_num_groups,
            shared: shared.clone(),
            scratch: Mutex::new(Scratch {
                req: Message::new(slot_size),
                ack: Message::new(slot_size),
            }),
        };

        let base = Arc::new(BaseGroup {
            shared: Arc::downgrade(&shared),
        });
        cntx.add_group(base)?;

        Ok(cntx)
    }

    /// Name of this context.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Privilege level of this context.
    pub fn privilege_level(&self) -> PrivilegeLevel {
        self.shared.privilege
    }

    /// The transport this context serves.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Add a service group.
    ///
    /// Fails with `Io` when the context is full, `Already` when the group
    /// is already present, and `Denied` when the group's privilege bitmap
    /// does not admit this context's privilege level.
    pub fn add_group(&self, group: Arc<dyn ServiceGroup>) -> Result<()> {
        let mut table = self.shared.table.lock();

        if table.groups.len() >= self.max_num_groups {
            log::warn!(
                "{}: no space to add group {}",
                self.name,
                group.info().name
            );
            return Err(RpmiError::Io);
        }
        if table.groups.iter().any(|g| Arc::ptr_eq(g, &group)) {
            log::warn!("{}: group {} already added", self.name, group.info().name);
            return Err(RpmiError::Already);
        }
        if !group
            .info()
            .privilege
            .contains(self.shared.privilege.mask())
        {
            log::warn!(
                "{}: group {} not allowed at this privilege level",
                self.name,
                group.info().name
            );
            return Err(RpmiError::Denied);
        }

        if group.info().group_id == group_id::SYSTEM_MSI {
            table.sysmsi = Some(group.clone());
        }
        table.groups.push(group);
        Ok(())
    }

    /// Remove a previously added service group.
    pub fn remove_group(&self, group: &Arc<dyn ServiceGroup>) {
        let mut table = self.shared.table.lock();
        if let Some(pos) = table.groups.iter().position(|g| Arc::ptr_eq(g, group)) {
            table.groups.remove(pos);
            if table
                .sysmsi
                .as_ref()
                .is_some_and(|msi| Arc::ptr_eq(msi, group))
            {
                table.sysmsi = None;
            }
        }
    }

    /// Find a service group by ID.
    pub fn find_group(&self, servicegroup_id: u16) -> Option<Arc<dyn ServiceGroup>> {
        self.shared.find_group(servicegroup_id)
    }

    /// Number of groups currently in the context.
    pub fn num_groups(&self) -> usize {
        self.shared.table.lock().groups.len()
    }

    /// Drain and serve the A2P request queue.
    ///
    /// Runs until the queue is empty. Must not be re-entered by the same
    /// executor; the scratch-message lock enforces mutual exclusion
    /// across executors.
    pub fn process_a2p_request(&self) {
        let mut scratch = self.scratch.lock();
        let Scratch { req, ack } = &mut *scratch;

        while self.transport.dequeue(QueueType::A2pRequest, req).is_ok() {
            let Some(group) = self.shared.find_group(req.header.servicegroup_id) else {
                log::debug!(
                    "{}: service group ID {:#x} not found",
                    self.name,
                    req.header.servicegroup_id
                );
                continue;
            };

            let (do_process, do_acknowledge) = match req.header.message_type() {
                Some(MessageType::NormalRequest) => (true, true),
                Some(MessageType::PostedRequest) => (true, false),
                Some(MessageType::Acknowledgement) | Some(MessageType::Notification) | None => {
                    log::debug!(
                        "{}: group {} dropping non-request from a2p queue",
                        self.name,
                        group.info().name
                    );
                    (false, false)
                }
            };
            if !do_process {
                continue;
            }

            ack.header.flags = MessageType::Acknowledgement as u8;
            ack.header.service_id = req.header.service_id;
            ack.header.servicegroup_id = req.header.servicegroup_id;
            ack.header.datalen = 0;
            ack.header.token = req.header.token;

            let call = ServiceCall {
                service_id: req.header.service_id,
                data: req.payload(),
                is_be: self.transport.is_be(),
                slot_size: self.transport.slot_size(),
            };

            let is_be = self.transport.is_be();
            let mut rsp = ResponseWriter::new(ack.payload_buf_mut(), is_be);
            let spec = group.info().service(call.service_id);
            let rc = match spec {
                Some(spec)
                    if spec.implemented && req.header.datalen >= spec.min_request_len =>
                {
                    group.handle_request(&call, &mut rsp)
                }
                _ => {
                    // Missing service, absent handler or short request:
                    // a successful reply carrying NOTSUPP.
                    rsp.put_i32(RpmiError::NotSupported.code());
                    Ok(())
                }
            };
            let rsp_len = rsp.len();

            if let Err(err) = rc {
                log::warn!(
                    "{}: group {} service {:#x} request failed ({:?})",
                    self.name,
                    group.info().name,
                    req.header.service_id,
                    err
                );
                continue;
            }
            if !do_acknowledge {
                continue;
            }
            ack.header.datalen = rsp_len as u16;

            loop {
                match self.transport.enqueue(QueueType::P2aAck, ack) {
                    Err(RpmiError::Io) => continue,
                    Err(err) => {
                        log::warn!(
                            "{}: group {} p2a acknowledgement failed ({:?})",
                            self.name,
                            group.info().name,
                            err
                        );
                        break;
                    }
                    Ok(()) => break,
                }
            }

            if req.header.has_doorbell() {
                let msi = self.shared.table.lock().sysmsi.clone();
                if let Some(msi) = msi {
                    if let Err(err) = msi.inject_p2a_doorbell() {
                        log::debug!("{}: p2a doorbell injection failed ({:?})", self.name, err);
                    }
                }
            }
        }
    }

    /// Run the event-tick hook of the group with the given ID.
    pub fn process_group_events(&self, servicegroup_id: u16) {
        let Some(group) = self.shared.find_group(servicegroup_id) else {
            log::debug!(
                "{}: group not found for servicegroup_id {:#x}",
                self.name,
                servicegroup_id
            );
            return;
        };
        self.tick_group(&group);
    }

    /// Run the event-tick hook of every group.
    pub fn process_all_events(&self) {
        // Snapshot under the groups lock, tick outside it so group locks
        // never nest inside the groups lock.
        let groups: Vec<_> = self.shared.table.lock().groups.clone();
        for group in &groups {
            self.tick_group(group);
        }
    }

    fn tick_group(&self, group: &Arc<dyn ServiceGroup>) {
        match group.process_events() {
            Ok(()) | Err(RpmiError::Busy) => {}
            Err(err) => {
                log::warn!(
                    "{}: group {} event processing failed ({:?})",
                    self.name,
                    group.info().name,
                    err
                );
            }
        }
    }
}

impl Shared {
    fn find_group(&self, servicegroup_id: u16) -> Option<Arc<dyn ServiceGroup>> {
        self.table
            .lock()
            .groups
            .iter()
            .find(|g| g.info().group_id == servicegroup_id)
            .cloned()
    }
}

/// The built-in Base service group.
struct BaseGroup {
    shared: Weak<Shared>,
}

static BASE_SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(0),   // GET_IMPLEMENTATION_VERSION
    ServiceSpec::new(0),   // GET_IMPLEMENTATION_IDN
    ServiceSpec::new(0),   // GET_SPEC_VERSION
    ServiceSpec::new(0),   // GET_PLATFORM_INFO
    ServiceSpec::new(4),   // PROBE_SERVICE_GROUP
    ServiceSpec::new(0),   // GET_ATTRIBUTES
];

static BASE_INFO: GroupInfo = GroupInfo {
    name: "base",
    group_id: group_id::BASE,
    version: crate::SPEC_VERSION,
    privilege: PrivilegeFlags::S_MODE.union(PrivilegeFlags::M_MODE),
    services: BASE_SERVICES,
};

impl ServiceGroup for BaseGroup {
    fn info(&self) -> &GroupInfo {
        &BASE_INFO
    }

    fn handle_request(&self, call: &ServiceCall<'_>, rsp: &mut ResponseWriter<'_>) -> Result<()> {
        let Some(shared) = self.shared.upgrade() else {
            return Err(RpmiError::NoData);
        };

        match call.service_id {
            base_service::GET_IMPLEMENTATION_VERSION => {
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(crate::IMPL_VERSION);
            }
            base_service::GET_IMPLEMENTATION_IDN => {
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(crate::IMPL_ID);
            }
            base_service::GET_SPEC_VERSION => {
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(crate::SPEC_VERSION);
            }
            base_service::GET_PLATFORM_INFO => {
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(shared.plat_info.len() as u32);
                rsp.put_bytes(&shared.plat_info);
            }
            base_service::PROBE_SERVICE_GROUP => {
                let probe_id = call.reader().u32(0) as u16;
                let version = shared
                    .find_group(probe_id)
                    .map_or(0, |g| g.info().version);
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(version);
            }
            base_service::GET_ATTRIBUTES => {
                let flags = match shared.privilege {
                    PrivilegeLevel::M => BASE_FLAGS_F0_PRIVILEGE,
                    PrivilegeLevel::S => 0,
                };
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(flags);
                rsp.put_u32(0);
                rsp.put_u32(0);
                rsp.put_u32(0);
            }
            _ => {
                rsp.put_i32(RpmiError::NotSupported.code());
            }
        }
        Ok(())
    }
}
