//! # System Suspend Service Group
//!
//! Orchestrates whole-system suspend on behalf of one requesting hart.
//! The request is accepted only while the system is running and every
//! other hart is stopped; the suspend then advances through a small state
//! machine driven by the event tick: prepare on request, finalize once
//! the platform reports ready, resume once the platform reports a wakeup
//! condition.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use rpmi_core::error::STATUS_SUCCESS;
use rpmi_core::message::ResponseWriter;
use rpmi_core::{
    group_id, GroupInfo, PrivilegeFlags, Result, RpmiError, ServiceCall, ServiceGroup,
    ServiceSpec,
};
use rpmi_hsm::{HartState, Hsm};

/// System suspend service IDs.
pub mod service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// Query attributes of a suspend type.
    pub const GET_ATTRIBUTES: u8 = 0x02;
    /// Suspend the system.
    pub const SYSTEM_SUSPEND: u8 = 0x03;
}

/// Suspend-to-RAM suspend type.
pub const SUSPEND_TYPE_TO_RAM: u32 = 0;

/// GET_ATTRIBUTES flag: the queried suspend type is supported.
pub const ATTRS_FLAG_SUSPEND_TYPE: u32 = 1;
/// GET_ATTRIBUTES flag: the suspend type honours a custom resume address.
pub const ATTRS_FLAG_RESUME_ADDR: u32 = 1 << 1;

/// A system suspend type: wire value plus attribute flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemSuspendType {
    /// Suspend type value on the wire.
    pub value: u32,
    /// Attribute flags (bit 1: custom resume address supported).
    pub attr: u32,
}

/// Platform operations for system suspend.
///
/// All hooks are synchronous and called with the group lock held.
pub trait SysSuspendPlatform: Send + Sync {
    /// Prepare the system for suspend on behalf of `hart_index`.
    fn suspend_prepare(
        &self,
        hart_index: u32,
        suspend_type: &SystemSuspendType,
        resume_addr: u64,
    ) -> Result<()>;

    /// Whether the system is ready to complete the suspend.
    fn suspend_ready(&self, hart_index: u32) -> bool;

    /// Complete the suspend entry.
    fn suspend_finalize(
        &self,
        hart_index: u32,
        suspend_type: &SystemSuspendType,
        resume_addr: u64,
    );

    /// Whether a wakeup condition is pending.
    fn can_resume(&self, hart_index: u32) -> bool;

    /// Resume the system.
    fn resume(
        &self,
        hart_index: u32,
        suspend_type: &SystemSuspendType,
        resume_addr: u64,
    ) -> Result<()>;
}

/// Suspend progress of the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SuspendState {
    Running,
    SuspendPending,
    Suspended,
}

#[derive(Debug)]
struct Current {
    state: SuspendState,
    hart_index: u32,
    /// Index into the suspend-type array while a suspend is in flight.
    type_index: usize,
    resume_addr: u64,
}

/// The system suspend service group.
pub struct SysSuspendGroup {
    hsm: Arc<Hsm>,
    types: Vec<SystemSuspendType>,
    ops: Arc<dyn SysSuspendPlatform>,
    current: Mutex<Current>,
}

static SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(4),   // GET_ATTRIBUTES
    ServiceSpec::new(16),  // SYSTEM_SUSPEND
];

static INFO: GroupInfo = GroupInfo {
    name: "syssusp",
    group_id: group_id::SYSTEM_SUSPEND,
    version: rpmi_core::SPEC_VERSION,
    privilege: PrivilegeFlags::M_MODE,
    services: SERVICES,
};

impl SysSuspendGroup {
    /// Create a system suspend group over `hsm` and the supported
    /// suspend types.
    pub fn new(
        hsm: Arc<Hsm>,
        types: Vec<SystemSuspendType>,
        ops: Arc<dyn SysSuspendPlatform>,
    ) -> Result<Arc<Self>> {
        if types.is_empty() {
            return Err(RpmiError::InvalidParam);
        }
        Ok(Arc::new(Self {
            hsm,
            types,
            ops,
            current: Mutex::new(Current {
                state: SuspendState::Running,
                hart_index: 0,
                type_index: 0,
                resume_addr: 0,
            }),
        }))
    }

    fn find_type(&self, value: u32) -> Option<usize> {
        self.types.iter().position(|t| t.value == value)
    }

    fn do_suspend(&self, hart_id: u32, type_value: u32, resume_addr: u64) -> Result<()> {
        let hart_index = self
            .hsm
            .hart_id2index(hart_id)
            .ok_or(RpmiError::InvalidParam)?;
        let type_index = self.find_type(type_value).ok_or(RpmiError::InvalidParam)?;

        let mut current = self.current.lock();
        if current.state != SuspendState::Running {
            return Err(RpmiError::Already);
        }

        // Every other hart must be stopped. A suspended hart also blocks
        // system suspend even though suspension implies idleness.
        for index in 0..self.hsm.hart_count() {
            if index == hart_index {
                continue;
            }
            let id = self.hsm.hart_index2id(index).ok_or(RpmiError::Failed)?;
            if self.hsm.get_hart_state(id)? != HartState::Stopped {
                return Err(RpmiError::Denied);
            }
        }

        self.ops
            .suspend_prepare(hart_index, &self.types[type_index], resume_addr)?;

        current.hart_index = hart_index;
        current.type_index = type_index;
        current.resume_addr = resume_addr;
        current.state = SuspendState::SuspendPending;
        Ok(())
    }
}

impl ServiceGroup for SysSuspendGroup {
    fn info(&self) -> &GroupInfo {
        &INFO
    }

    fn handle_request(&self, call: &ServiceCall<'_>, rsp: &mut ResponseWriter<'_>) -> Result<()> {
        let req = call.reader();
        match call.service_id {
            service::GET_ATTRIBUTES => {
                let mut attrs = 0;
                if let Some(index) = self.find_type(req.u32(0)) {
                    attrs |= ATTRS_FLAG_SUSPEND_TYPE;
                    attrs |= self.types[index].attr & ATTRS_FLAG_RESUME_ADDR;
                }
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(attrs);
            }
            service::SYSTEM_SUSPEND => {
                let hart_id = req.u32(0);
                let type_value = req.u32(1);
                let resume_addr = req.u64(2);
                let result = self.do_suspend(hart_id, type_value, resume_addr);
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            _ => rsp.put_i32(RpmiError::NotSupported.code()),
        }
        Ok(())
    }

    fn process_events(&self) -> Result<()> {
        let mut current = self.current.lock();
        match current.state {
            SuspendState::SuspendPending => {
                if !self.ops.suspend_ready(current.hart_index) {
                    return Err(RpmiError::Busy);
                }
                self.ops.suspend_finalize(
                    current.hart_index,
                    &self.types[current.type_index],
                    current.resume_addr,
                );
                current.state = SuspendState::Suspended;
            }
            SuspendState::Suspended => {
                if !self.ops.can_resume(current.hart_index) {
                    return Err(RpmiError::Busy);
                }
                self.ops.resume(
                    current.hart_index,
                    &self.types[current.type_index],
                    current.resume_addr,
                )?;
                current.state = SuspendState::Running;
            }
            SuspendState::Running => {}
        }
        Ok(())
    }
}
