//! # Performance Service Group
//!
//! Operating-point control for performance domains: each domain carries a
//! table of levels (index, frequency, power cost, transition latency) and
//! the platform maps level changes onto its own hardware operating
//! points. Limits bound the level range the platform may pick from.

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

/// Performance service IDs.
pub mod service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// Number of performance domains.
    pub const GET_NUM_DOMAINS: u8 = 0x02;
    /// Static attributes of one domain.
    pub const GET_ATTRIBUTES: u8 = 0x03;
    /// Supported levels, paginated.
    pub const GET_SUPPORTED_LEVELS: u8 = 0x04;
    /// Current level of one domain.
    pub const GET_PERF_LEVEL: u8 = 0x05;
    /// Change the level of one domain.
    pub const SET_PERF_LEVEL: u8 = 0x06;
    /// Current level limits of one domain.
    pub const GET_PERF_LIMIT: u8 = 0x07;
    /// Change the level limits of one domain.
    pub const SET_PERF_LIMIT: u8 = 0x08;
}

/// One supported performance level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfLevel {
    /// Level index used on the wire.
    pub level: u32,
    /// Clock frequency at this level, in kHz.
    pub clock_freq_khz: u32,
    /// Relative power cost of this level.
    pub power_cost: u32,
    /// Transition latency into this level, in microseconds.
    pub transition_latency_us: u32,
}

/// Static description of one performance domain.
#[derive(Debug, Clone)]
pub struct PerfData {
    /// Domain name.
    pub name: &'static str,
    /// Capability word reported by GET_ATTRIBUTES (platform defined).
    pub capability: u32,
    /// Level transition latency in microseconds.
    pub transition_latency_us: u32,
    /// Supported levels.
    pub levels: Vec<PerfLevel>,
}

/// Platform operations for performance domains, called with the domain's
/// lock held.
pub trait PerfPlatform: Send + Sync {
    /// Current level of a domain.
    fn get_level(&self, domain_id: u32) -> Result<u32>;
    /// Change the level of a domain.
    fn set_level(&self, domain_id: u32, level: u32) -> Result<()>;
    /// Current (max, min) level limits of a domain.
    fn get_limit(&self, domain_id: u32) -> Result<(u32, u32)>;
    /// Change the (max, min) level limits of a domain.
    fn set_limit(&self, domain_id: u32, max_level: u32, min_level: u32) -> Result<()>;
}

struct Domain {
    data: PerfData,
    lock: Mutex<()>,
}

/// The performance service group.
pub struct PerfGroup {
    domains: Vec<Domain>,
    ops: Arc<dyn PerfPlatform>,
}

static SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(0),   // GET_NUM_DOMAINS
    ServiceSpec::new(4),   // GET_ATTRIBUTES
    ServiceSpec::new(8),   // GET_SUPPORTED_LEVELS
    ServiceSpec::new(4),   // GET_PERF_LEVEL
    ServiceSpec::new(8),   // SET_PERF_LEVEL
    ServiceSpec::new(4),   // GET_PERF_LIMIT
    ServiceSpec::new(12),  // SET_PERF_LIMIT
];

static INFO: GroupInfo = GroupInfo {
    name: "perf",
    group_id: group_id::PERFORMANCE,
    version: rpmi_core::SPEC_VERSION,
    privilege: PrivilegeFlags::S_MODE.union(PrivilegeFlags::M_MODE),
    services: SERVICES,
};

impl PerfGroup {
    /// Create a performance group over static domain data.
    pub fn new(domain_data: Vec<PerfData>, ops: Arc<dyn PerfPlatform>) -> Result<Arc<Self>> {
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
}

impl ServiceGroup for PerfGroup {
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
                    rsp.put_u32(domain.data.transition_latency_us);
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
                let max_levels = ((call.max_data_len() - 4 * 4) / 16) as u32;
                let returned = max_levels.min(total - start);
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(0);
                rsp.put_u32(total - (start + returned));
                rsp.put_u32(returned);
                for i in 0..returned {
                    let level = &levels[(start + i) as usize];
                    rsp.put_u32(level.level);
                    rsp.put_u32(level.clock_freq_khz);
                    rsp.put_u32(level.power_cost);
                    rsp.put_u32(level.transition_latency_us);
                }
            }
            service::GET_PERF_LEVEL => {
                let result = self.domain(req.u32(0)).and_then(|domain| {
                    let _guard = domain.lock.lock();
                    self.ops.get_level(req.u32(0))
                });
                match result {
                    Ok(level) => {
                        rsp.put_i32(STATUS_SUCCESS);
                        rsp.put_u32(level);
                    }
                    Err(err) => rsp.put_i32(err.code()),
                }
            }
            service::SET_PERF_LEVEL => {
                let result = self.domain(req.u32(0)).and_then(|domain| {
                    let _guard = domain.lock.lock();
                    self.ops.set_level(req.u32(0), req.u32(1))
                });
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            service::GET_PERF_LIMIT => {
                let result = self.domain(req.u32(0)).and_then(|domain| {
                    let _guard = domain.lock.lock();
                    self.ops.get_limit(req.u32(0))
                });
                match result {
                    Ok((max_level, min_level)) => {
                        rsp.put_i32(STATUS_SUCCESS);
                        rsp.put_u32(max_level);
                        rsp.put_u32(min_level);
                    }
                    Err(err) => rsp.put_i32(err.code()),
                }
            }
            service::SET_PERF_LIMIT => {
                let result = self.domain(req.u32(0)).and_then(|domain| {
                    let _guard = domain.lock.lock();
                    self.ops.set_limit(req.u32(0), req.u32(1), req.u32(2))
                });
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            _ => rsp.put_i32(RpmiError::NotSupported.code()),
        }
        Ok(())
    }
}
