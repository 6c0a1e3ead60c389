//! # Voltage Service Group
//!
//! Regulator control for voltage domains described by static per-domain
//! data: a capability word, a transition latency, and the supported
//! levels in microvolts. Level listings paginate over the static table;
//! config and level changes go through the platform ops under the
//! domain's lock.

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

/// Voltage service IDs.
pub mod service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// Number of voltage domains.
    pub const GET_NUM_DOMAINS: u8 = 0x02;
    /// Static attributes of one domain.
    pub const GET_ATTRIBUTES: u8 = 0x03;
    /// Supported levels in microvolts, paginated.
    pub const GET_SUPPORTED_LEVELS: u8 = 0x04;
    /// Enable or disable the regulator.
    pub const SET_CONFIG: u8 = 0x05;
    /// Current regulator config.
    pub const GET_CONFIG: u8 = 0x06;
    /// Change the voltage level.
    pub const SET_VOLT_LEVEL: u8 = 0x07;
    /// Current voltage level.
    pub const GET_VOLT_LEVEL: u8 = 0x08;
}

/// Static description of one voltage domain.
#[derive(Debug, Clone)]
pub struct VoltageData {
    /// Domain name.
    pub name: &'static str,
    /// Capability word reported by GET_ATTRIBUTES (level format and
    /// control bits, platform defined).
    pub capability: u32,
    /// Level transition latency in milliseconds.
    pub transition_latency_ms: u32,
    /// Supported levels in microvolts.
    pub levels: Vec<i32>,
}

/// Platform operations for voltage domains, called with the domain's
/// lock held.
pub trait VoltagePlatform: Send + Sync {
    /// Current regulator config of a domain.
    fn get_config(&self, domain_id: u32) -> Result<u32>;
    /// Change the regulator config of a domain.
    fn set_config(&self, domain_id: u32, config: u32) -> Result<()>;
    /// Current level of a domain in microvolts.
    fn get_level(&self, domain_id: u32) -> Result<i32>;
    /// Change the level of a domain.
    fn set_level(&self, domain_id: u32, level: i32) -> Result<()>;
}

struct Domain {
    data: VoltageData,
    lock: Mutex<()>,
}

/// The voltage service group.
pub struct VoltageGroup {
    domains: Vec<Domain>,
    ops: Arc<dyn VoltagePlatform>,
}

static SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(0),   // GET_NUM_DOMAINS
    ServiceSpec::new(4),   // GET_ATTRIBUTES
    ServiceSpec::new(8),   // GET_SUPPORTED_LEVELS
    ServiceSpec::new(8),   // SET_CONFIG
    ServiceSpec::new(4),   // GET_CONFIG
    ServiceSpec::new(8),   // SET_VOLT_LEVEL
    ServiceSpec::new(4),   // GET_VOLT_LEVEL
];

static INFO: GroupInfo = GroupInfo {
    name: "voltage",
    group_id: group_id::VOLTAGE,
    version: rpmi_core::SPEC_VERSION,
    privilege: PrivilegeFlags::S_MODE.union(PrivilegeFlags::M_MODE),
    services: SERVICES,
};

impl VoltageGroup {
    /// Create a voltage group over static domain data.
    pub fn new(domain_data: Vec<VoltageData>, ops: Arc<dyn VoltagePlatform>) -> Result<Arc<Self>> {
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

    fn set_config(&self, domain_id: u32, config: u32) -> Result<()> {
        let domain = self.domain(domain_id)?;
        let _guard = domain.lock.lock();
        if self.ops.get_config(domain_id)? == config {
            return Ok(());
        }
        self.ops.set_config(domain_id, config)
    }
}

impl ServiceGroup for VoltageGroup {
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
                    rsp.put_u32(domain.data.capability);
                    rsp.put_u32(domain.data.levels.len() as u32);
                    rsp.put_u32(domain.data.transition_latency_ms);
                    rsp.put_name(domain.data.name, NAME_MAX_LEN);
                }
                Err(err) => rsp.put_i32(err.code()),
            },
            service::GET_SUPPORTED_LEVELS => {
                let Ok(domain) = self.domain(req.u32(0)) else {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                };
                let levels = &domain.data.levels;
                if levels.is_empty() {
                    rsp.put_i32(RpmiError::NotSupported.code());
                    return Ok(());
                }

                let total = levels.len() as u32;
                let start = req.u32(1);
                if start > total {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                let max_levels = ((call.max_data_len() - 4 * 4) / 4) as u32;
                let returned = max_levels.min(total - start);
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(0);
                rsp.put_u32(total - (start + returned));
                rsp.put_u32(returned);
                for i in 0..returned {
                    rsp.put_i32(levels[(start + i) as usize]);
                }
            }
            service::SET_CONFIG => {
                let result = self.set_config(req.u32(0), req.u32(1));
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            service::GET_CONFIG => {
                let result = self.domain(req.u32(0)).and_then(|domain| {
                    let _guard = domain.lock.lock();
                    self.ops.get_config(req.u32(0))
                });
                match result {
                    Ok(config) => {
                        rsp.put_i32(STATUS_SUCCESS);
                        rsp.put_u32(config);
                    }
                    Err(err) => rsp.put_i32(err.code()),
                }
            }
            service::SET_VOLT_LEVEL => {
                let result = self.domain(req.u32(0)).and_then(|domain| {
                    let _guard = domain.lock.lock();
                    self.ops.set_level(req.u32(0), req.u32(1) as i32)
                });
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            service::GET_VOLT_LEVEL => {
                let result = self.domain(req.u32(0)).and_then(|domain| {
                    let _guard = domain.lock.lock();
                    self.ops.get_level(req.u32(0))
                });
                match result {
                    Ok(level) => {
                        rsp.put_i32(STATUS_SUCCESS);
                        rsp.put_i32(level);
                    }
                    Err(err) => rsp.put_i32(err.code()),
                }
            }
            _ => rsp.put_i32(RpmiError::NotSupported.code()),
        }
        Ok(())
    }
}
