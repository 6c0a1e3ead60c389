//! # Device Power Service Group
//!
//! On/off control of device power domains described by static per-domain
//! data. Setting a domain to its current state is a no-op success;
//! anything beyond the two states is the platform's problem and reported
//! as an invalid state.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use rpmi_core::error::STATUS_SUCCESS;
use rpmi_core::message::ResponseWriter;
use rpmi_core::{
    group_id, GroupInfo, PrivilegeFlags, Result, RpmiError, ServiceCall, ServiceGroup,
    ServiceSpec,
};

use crate::NAME_MAX_LEN;

/// Device power service IDs.
pub mod service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// Number of power domains.
    pub const GET_NUM_DOMAINS: u8 = 0x02;
    /// Static attributes of one domain.
    pub const GET_ATTRIBUTES: u8 = 0x03;
    /// Change the power state of one domain.
    pub const SET_DPWR_STATE: u8 = 0x04;
    /// Current power state of one domain.
    pub const GET_DPWR_STATE: u8 = 0x05;
}

/// Domain is powered on.
pub const DPWR_STATE_ON: u32 = 0;
/// Domain is powered off.
pub const DPWR_STATE_OFF: u32 = 1;

/// Static description of one device power domain.
#[derive(Debug, Clone)]
pub struct DevicePowerData {
    /// Domain name.
    pub name: &'static str,
    /// State transition latency in milliseconds.
    pub transition_latency_ms: u32,
}

/// Platform operations for device power domains, called with the
/// domain's lock held.
pub trait DevicePowerPlatform: Send + Sync {
    /// Current power state of a domain.
    fn get_state(&self, domain_id: u32) -> Result<u32>;
    /// Change the power state of a domain.
    fn set_state(&self, domain_id: u32, state: u32) -> Result<()>;
}

struct Domain {
    data: DevicePowerData,
    lock: Mutex<()>,
}

/// The device power service group.
pub struct DevicePowerGroup {
    domains: Vec<Domain>,
    ops: Arc<dyn DevicePowerPlatform>,
}

static SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(0),   // GET_NUM_DOMAINS
    ServiceSpec::new(4),   // GET_ATTRIBUTES
    ServiceSpec::new(8),   // SET_DPWR_STATE
    ServiceSpec::new(4),   // GET_DPWR_STATE
];

static INFO: GroupInfo = GroupInfo {
    name: "dpwr",
    group_id: group_id::DEVICE_POWER,
    version: rpmi_core::SPEC_VERSION,
    privilege: PrivilegeFlags::S_MODE.union(PrivilegeFlags::M_MODE),
    services: SERVICES,
};

impl DevicePowerGroup {
    /// Create a device power group over static domain data.
    pub fn new(
        domain_data: Vec<DevicePowerData>,
        ops: Arc<dyn DevicePowerPlatform>,
    ) -> Result<Arc<Self>> {
        if domain_data.is_empty() {
            return Err(RpmiError::InvalidParam);
        }
        let domains = domain_data
            .into_iter()
            .map(|data| Domain {
                data,
                lock: Mutex::new(()),
            })
            .collect();
        Ok(Arc::new(Self { domains, ops }))
    }

    fn domain(&self, domain_id: u32) -> Result<&Domain> {
        self.domains
            .get(domain_id as usize)
            .ok_or(RpmiError::InvalidParam)
    }

    fn get_state(&self, domain_id: u32) -> Result<u32> {
        let domain = self.domain(domain_id)?;
        let _guard = domain.lock.lock();
        let state = self.ops.get_state(domain_id)?;
        if state != DPWR_STATE_ON && state != DPWR_STATE_OFF {
            return Err(RpmiError::InvalidState);
        }
        Ok(state)
    }

    fn set_state(&self, domain_id: u32, state: u32) -> Result<()> {
        let domain = self.domain(domain_id)?;
        let _guard = domain.lock.lock();
        if self.ops.get_state(domain_id)? == state {
            return Ok(());
        }
        self.ops.set_state(domain_id, state)
    }
}

impl ServiceGroup for DevicePowerGroup {
    fn info(&self) -> &GroupInfo {
        &INFO
    }

    fn handle_request(&self, call: &ServiceCall<'_>, rsp: &mut ResponseWriter<'_>) -> Result<()> {
        let req = call.reader();
        match call.service_id {
            service::GET_NUM_DOMAINS => {
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(self.domains.len() as u32);
            }
            service::GET_ATTRIBUTES => match self.domain(req.u32(0)) {
                Ok(domain) => {
                    rsp.put_i32(STATUS_SUCCESS);
                    rsp.put_u32(0);
                    rsp.put_u32(domain.data.transition_latency_ms);
                    rsp.put_name(domain.data.name, NAME_MAX_LEN);
                }
                Err(err) => rsp.put_i32(err.code()),
            },
            service::SET_DPWR_STATE => {
                let result = self.set_state(req.u32(0), req.u32(1));
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            service::GET_DPWR_STATE => match self.get_state(req.u32(0)) {
                Ok(state) => {
                    rsp.put_i32(STATUS_SUCCESS);
                    rsp.put_u32(state);
                }
                Err(err) => rsp.put_i32(err.code()),
            },
            _ => rsp.put_i32(RpmiError::NotSupported.code()),
        }
        Ok(())
    }
}
