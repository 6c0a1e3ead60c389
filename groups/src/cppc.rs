//! # CPPC Service Group
//!
//! Performance hints modelled on ACPI's Collaborative Processor
//! Performance Control, in passive mode: the supervisor requests a
//! desired performance level, the platform applies its own heuristics
//! and reports the resulting frequency.
//!
//! Slow-path register access goes through PROBE/READ/WRITE_REG services;
//! the fast path is a shared-memory region of per-hart 8-byte entries.
//! The application processor writes *perf-request* entries, the platform
//! answers through *perf-feedback* entries. The event tick edge-detects
//! request changes against an in-memory shadow so a torn or repeated
//! write never reaches the platform twice.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;
use static_assertions::const_assert_eq;

use rpmi_core::error::STATUS_SUCCESS;
use rpmi_core::message::ResponseWriter;
use rpmi_core::{
    group_id, GroupInfo, PrivilegeFlags, Result, RpmiError, ServiceCall, ServiceGroup,
    ServiceSpec, Shmem,
};
use rpmi_hsm::Hsm;

/// CPPC service IDs.
pub mod service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// Probe a CPPC register: implemented or not, and its width.
    pub const PROBE_REG: u8 = 0x02;
    /// Read a CPPC register.
    pub const READ_REG: u8 = 0x03;
    /// Write a CPPC register.
    pub const WRITE_REG: u8 = 0x04;
    /// Describe the fast-channel shared-memory region.
    pub const GET_FAST_CHANNEL_REGION: u8 = 0x05;
    /// Per-hart offsets of the request and feedback entries.
    pub const GET_FAST_CHANNEL_OFFSET: u8 = 0x06;
    /// List managed hart IDs, paginated.
    pub const GET_HART_LIST: u8 = 0x07;
}

/// ACPI CPPC register IDs, plus the non-ACPI transition latency.
pub mod reg {
    /// Highest sustained performance level (read-only).
    pub const HIGHEST_PERF: u32 = 0x0000_0000;
    /// Nominal performance level (read-only).
    pub const NOMINAL_PERF: u32 = 0x0000_0001;
    /// Lowest non-linear performance level (read-only).
    pub const LOWEST_NON_LINEAR_PERF: u32 = 0x0000_0002;
    /// Lowest performance level (read-only).
    pub const LOWEST_PERF: u32 = 0x0000_0003;
    /// Guaranteed performance level.
    pub const GUARANTEED_PERF: u32 = 0x0000_0004;
    /// Desired performance level.
    pub const DESIRED_PERF: u32 = 0x0000_0005;
    /// Minimum performance bound.
    pub const MIN_PERF: u32 = 0x0000_0006;
    /// Maximum performance bound.
    pub const MAX_PERF: u32 = 0x0000_0007;
    /// Performance reduction tolerance.
    pub const PERF_REDUCTION_TOLERANCE: u32 = 0x0000_0008;
    /// Time window.
    pub const TIME_WINDOW: u32 = 0x0000_0009;
    /// Counter wraparound time.
    pub const COUNTER_WRAPAROUND_TIME: u32 = 0x0000_000A;
    /// Reference performance counter (64-bit).
    pub const REFERENCE_PERF_COUNTER: u32 = 0x0000_000B;
    /// Delivered performance counter (64-bit).
    pub const DELIVERED_PERF_COUNTER: u32 = 0x0000_000C;
    /// Performance limited indicator.
    pub const PERF_LIMITED: u32 = 0x0000_000D;
    /// CPPC enable.
    pub const CPPC_ENABLE: u32 = 0x0000_000E;
    /// Autonomous selection enable.
    pub const AUTONOMOUS_SELECTION_ENABLE: u32 = 0x0000_000F;
    /// Autonomous activity window.
    pub const AUTONOMOUS_ACTIVITY_WINDOW: u32 = 0x0000_0010;
    /// Energy/performance preference.
    pub const ENERGY_PERF_PREFERENCE: u32 = 0x0000_0011;
    /// Reference performance level (read-only).
    pub const REFERENCE_PERF: u32 = 0x0000_0012;
    /// Lowest frequency in MHz (read-only).
    pub const LOWEST_FREQ: u32 = 0x0000_0013;
    /// Nominal frequency in MHz (read-only).
    pub const NOMINAL_FREQ: u32 = 0x0000_0014;
    /// One past the last ACPI register.
    pub const ACPI_MAX: u32 = 0x0000_0015;
    /// Rate transition latency (non-ACPI).
    pub const TRANSITION_LATENCY: u32 = 0x8000_0000;
    /// One past the last non-ACPI register.
    pub const NON_ACPI_MAX: u32 = 0x8000_0001;
}

/// CPPC mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CppcMode {
    /// Supervisor software drives performance via the desired level.
    Passive,
    /// Autonomous (CPPC2) mode; reserved, not implemented.
    Autonomous,
}

/// Size of one fast-channel entry in bytes.
pub const FAST_CHANNEL_SIZE: usize = 8;

const_assert_eq!(FAST_CHANNEL_SIZE, 2 * core::mem::size_of::<u32>());

/// Static CPPC register values shared by every hart.
///
/// The per-hart dynamic registers (counters, limited bit, desired level)
/// come from the platform ops or the fast channels instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct CppcRegs {
    /// Highest sustained performance level.
    pub highest_perf: u32,
    /// Nominal performance level.
    pub nominal_perf: u32,
    /// Lowest non-linear performance level.
    pub lowest_nonlinear_perf: u32,
    /// Lowest performance level.
    pub lowest_perf: u32,
    /// Reference performance level.
    pub reference_perf: u32,
    /// Lowest frequency in MHz.
    pub lowest_freq: u32,
    /// Nominal frequency in MHz.
    pub nominal_freq: u32,
    /// Rate transition latency in microseconds.
    pub transition_latency: u32,
}

/// Fast-channel layout inside one shared-memory region.
#[derive(Debug, Clone)]
pub struct FastChannelLayout {
    /// Shared memory backing both sub-arrays.
    pub shmem: Arc<Shmem>,
    /// Offset of the per-hart perf-request entries.
    pub perf_request_offset: usize,
    /// Offset of the per-hart perf-feedback entries.
    pub perf_feedback_offset: usize,
}

/// Platform CPPC operations.
pub trait CppcPlatform: Send + Sync {
    /// Read a dynamic register for a hart (counters, limited bit).
    fn cppc_get_reg(&self, reg_id: u32, hart_index: u32) -> Result<u64>;

    /// Write a dynamic register for a hart.
    fn cppc_set_reg(&self, reg_id: u32, hart_index: u32, val: u64) -> Result<()>;

    /// Apply a new desired performance level for a hart.
    fn cppc_update_perf(&self, hart_index: u32, desired_perf: u32) -> Result<()>;

    /// Current frequency of a hart in hertz.
    fn cppc_get_current_freq(&self, hart_index: u32) -> Result<u64>;
}

struct FastChannels {
    shmem: Arc<Shmem>,
    perf_request_offset: usize,
    perf_feedback_offset: usize,
    /// Last observed desired-perf value per hart, for edge detection.
    shadow: Mutex<Vec<u32>>,
}

/// The CPPC service group.
pub struct CppcGroup {
    hart_count: u32,
    hsm: Arc<Hsm>,
    regs: CppcRegs,
    fastchan: Option<FastChannels>,
    ops: Arc<dyn CppcPlatform>,
}

static SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(8),   // PROBE_REG
    ServiceSpec::new(8),   // READ_REG
    ServiceSpec::new(16),  // WRITE_REG
    ServiceSpec::new(0),   // GET_FAST_CHANNEL_REGION
    ServiceSpec::new(4),   // GET_FAST_CHANNEL_OFFSET
    ServiceSpec::new(4),   // GET_HART_LIST
];

static INFO: GroupInfo = GroupInfo {
    name: "cppc",
    group_id: group_id::CPPC,
    version: rpmi_core::SPEC_VERSION,
    privilege: PrivilegeFlags::S_MODE.union(PrivilegeFlags::M_MODE),
    services: SERVICES,
};

/// A register ID inside the defined namespace, implemented or not.
fn reg_valid(reg_id: u32) -> bool {
    reg_id < reg::ACPI_MAX || (reg::TRANSITION_LATENCY..reg::NON_ACPI_MAX).contains(&reg_id)
}

/// Width in bits of an implemented register; `None` when unimplemented.
fn reg_width(reg_id: u32) -> Option<u32> {
    match reg_id {
        reg::HIGHEST_PERF
        | reg::NOMINAL_PERF
        | reg::LOWEST_NON_LINEAR_PERF
        | reg::LOWEST_PERF
        | reg::DESIRED_PERF
        | reg::PERF_LIMITED
        | reg::REFERENCE_PERF
        | reg::LOWEST_FREQ
        | reg::NOMINAL_FREQ
        | reg::TRANSITION_LATENCY => Some(32),
        reg::REFERENCE_PERF_COUNTER | reg::DELIVERED_PERF_COUNTER => Some(64),
        _ => None,
    }
}

impl CppcGroup {
    /// Create a CPPC group over the harts managed by `hsm`.
    ///
    /// Only [`CppcMode::Passive`] is supported. When a fast-channel
    /// layout is given, the region is validated (8-byte aligned base and
    /// offsets, non-overlapping sub-arrays, sufficient size) and
    /// zero-filled.
    pub fn new(
        hsm: Arc<Hsm>,
        regs: CppcRegs,
        mode: CppcMode,
        fastchan: Option<FastChannelLayout>,
        ops: Arc<dyn CppcPlatform>,
    ) -> Result<Arc<Self>> {
        if mode != CppcMode::Passive {
            return Err(RpmiError::NotSupported);
        }
        let hart_count = hsm.hart_count();
        if hart_count == 0 {
            return Err(RpmiError::InvalidParam);
        }

        let fastchan = match fastchan {
            Some(layout) => Some(Self::init_fastchan(layout, hart_count)?),
            None => None,
        };

        Ok(Arc::new(Self {
            hart_count,
            hsm,
            regs,
            fastchan,
            ops,
        }))
    }

    fn init_fastchan(layout: FastChannelLayout, hart_count: u32) -> Result<FastChannels> {
        let array_size = hart_count as usize * FAST_CHANNEL_SIZE;
        let req = layout.perf_request_offset;
        let fb = layout.perf_feedback_offset;

        if layout.shmem.base() % FAST_CHANNEL_SIZE as u64 != 0 {
            return Err(RpmiError::InvalidAddr);
        }
        if req % FAST_CHANNEL_SIZE != 0 || fb % FAST_CHANNEL_SIZE != 0 {
            return Err(RpmiError::InvalidAddr);
        }
        let size = layout.shmem.size();
        if size < 2 * array_size
            || req.checked_add(array_size).is_none_or(|end| end > size)
            || fb.checked_add(array_size).is_none_or(|end| end > size)
        {
            return Err(RpmiError::InvalidParam);
        }
        // The request and feedback sub-arrays must not overlap.
        if req < fb + array_size && fb < req + array_size {
            return Err(RpmiError::InvalidParam);
        }

        layout.shmem.fill(req, 0, array_size)?;
        layout.shmem.fill(fb, 0, array_size)?;

        Ok(FastChannels {
            shmem: layout.shmem,
            perf_request_offset: req,
            perf_feedback_offset: fb,
            shadow: Mutex::new(vec![0; hart_count as usize]),
        })
    }

    /// Desired performance value currently in a hart's request channel.
    fn fastchan_desired_perf(&self, fastchan: &FastChannels, hart_index: u32) -> u32 {
        let offset = fastchan.perf_request_offset + hart_index as usize * FAST_CHANNEL_SIZE;
        fastchan.shmem.read_u32_le(offset).unwrap_or(0)
    }

    fn read_reg(&self, reg_id: u32, hart_index: u32) -> Result<u64> {
        match reg_id {
            reg::DELIVERED_PERF_COUNTER
            | reg::REFERENCE_PERF_COUNTER
            | reg::PERF_LIMITED => self.ops.cppc_get_reg(reg_id, hart_index),
            reg::HIGHEST_PERF => Ok(self.regs.highest_perf.into()),
            reg::NOMINAL_PERF => Ok(self.regs.nominal_perf.into()),
            reg::LOWEST_NON_LINEAR_PERF => Ok(self.regs.lowest_nonlinear_perf.into()),
            reg::LOWEST_PERF => Ok(self.regs.lowest_perf.into()),
            reg::REFERENCE_PERF => Ok(self.regs.reference_perf.into()),
            reg::LOWEST_FREQ => Ok(self.regs.lowest_freq.into()),
            reg::NOMINAL_FREQ => Ok(self.regs.nominal_freq.into()),
            reg::TRANSITION_LATENCY => Ok(self.regs.transition_latency.into()),
            reg::DESIRED_PERF => match &self.fastchan {
                Some(fastchan) => Ok(self.fastchan_desired_perf(fastchan, hart_index).into()),
                None => self.ops.cppc_get_reg(reg_id, hart_index),
            },
            _ => Err(RpmiError::Denied),
        }
    }

    fn write_reg(&self, reg_id: u32, hart_index: u32, val: u64) -> Result<()> {
        match reg_id {
            reg::DESIRED_PERF => {
                // With fast channels present the supervisor must use
                // them; the slow path is denied.
                if self.fastchan.is_some() {
                    return Err(RpmiError::Denied);
                }
                self.ops.cppc_set_reg(reg_id, hart_index, val)
            }
            _ => Err(RpmiError::Denied),
        }
    }

    fn hart_index(&self, hart_id: u32) -> Result<u32> {
        self.hsm.hart_id2index(hart_id).ok_or(RpmiError::InvalidParam)
    }
}

impl ServiceGroup for CppcGroup {
    fn info(&self) -> &GroupInfo {
        &INFO
    }

    fn handle_request(&self, call: &ServiceCall<'_>, rsp: &mut ResponseWriter<'_>) -> Result<()> {
        let req = call.reader();
        match call.service_id {
            service::PROBE_REG => {
                let hart_id = req.u32(0);
                let reg_id = req.u32(1);
                if !reg_valid(reg_id) {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                if self.hart_index(hart_id).is_err() {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                match reg_width(reg_id) {
                    Some(width) => {
                        rsp.put_i32(STATUS_SUCCESS);
                        rsp.put_u32(width);
                    }
                    None => {
                        rsp.put_i32(RpmiError::NotSupported.code());
                        rsp.put_u32(0);
                    }
                }
            }
            service::READ_REG => {
                let hart_id = req.u32(0);
                let reg_id = req.u32(1);
                if !reg_valid(reg_id) {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                let Ok(hart_index) = self.hart_index(hart_id) else {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                };
                if reg_width(reg_id).is_none() {
                    rsp.put_i32(RpmiError::NotSupported.code());
                    return Ok(());
                }
                match self.read_reg(reg_id, hart_index) {
                    Ok(val) => {
                        rsp.put_i32(STATUS_SUCCESS);
                        rsp.put_u64(val);
                    }
                    Err(err) => rsp.put_i32(err.code()),
                }
            }
            service::WRITE_REG => {
                let hart_id = req.u32(0);
                let reg_id = req.u32(1);
                let val = req.u64(2);
                if !reg_valid(reg_id) {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                let Ok(hart_index) = self.hart_index(hart_id) else {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                };
                if reg_width(reg_id).is_none() {
                    rsp.put_i32(RpmiError::NotSupported.code());
                    return Ok(());
                }
                let result = self.write_reg(reg_id, hart_index, val);
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            service::GET_FAST_CHANNEL_REGION => {
                let Some(fastchan) = &self.fastchan else {
                    rsp.put_i32(RpmiError::NotSupported.code());
                    return Ok(());
                };
                rsp.put_i32(STATUS_SUCCESS);
                // No doorbell, passive mode.
                rsp.put_u32(0);
                rsp.put_u64(fastchan.shmem.base());
                rsp.put_u64(fastchan.shmem.size() as u64);
                // Doorbell address, set mask and preserve mask.
                for _ in 0..6 {
                    rsp.put_u32(0);
                }
            }
            service::GET_FAST_CHANNEL_OFFSET => {
                let Some(fastchan) = &self.fastchan else {
                    rsp.put_i32(RpmiError::NotSupported.code());
                    return Ok(());
                };
                let Ok(hart_index) = self.hart_index(req.u32(0)) else {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                };
                let entry = hart_index as usize * FAST_CHANNEL_SIZE;
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u64((fastchan.perf_request_offset + entry) as u64);
                rsp.put_u64((fastchan.perf_feedback_offset + entry) as u64);
            }
            service::GET_HART_LIST => {
                let start = req.u32(0);
                let total = self.hart_count;
                if start > total {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    rsp.put_u32(total);
                    rsp.put_u32(0);
                    return Ok(());
                }
                let max_entries = ((call.max_data_len() - 3 * 4) / 4) as u32;
                let returned = max_entries.min(total - start);
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(total - (start + returned));
                rsp.put_u32(returned);
                for i in 0..returned {
                    rsp.put_u32(self.hsm.hart_index2id(start + i).unwrap_or(u32::MAX));
                }
            }
            _ => rsp.put_i32(RpmiError::NotSupported.code()),
        }
        Ok(())
    }

    /// Pick up fast-channel writes: for every hart whose desired level
    /// changed since the last tick, update the shadow, tell the platform,
    /// and publish the resulting frequency in the feedback channel.
    fn process_events(&self) -> Result<()> {
        let Some(fastchan) = &self.fastchan else {
            return Ok(());
        };

        let mut status = Ok(());
        let mut shadow = fastchan.shadow.lock();
        for hart_index in 0..self.hart_count {
            let desired = self.fastchan_desired_perf(fastchan, hart_index);
            if shadow[hart_index as usize] == desired {
                continue;
            }
            shadow[hart_index as usize] = desired;

            if let Err(err) = self.ops.cppc_update_perf(hart_index, desired) {
                status = Err(err);
                continue;
            }
            match self.ops.cppc_get_current_freq(hart_index) {
                Ok(freq) => {
                    let offset =
                        fastchan.perf_feedback_offset + hart_index as usize * FAST_CHANNEL_SIZE;
                    fastchan.shmem.write_u32_le(offset, freq as u32)?;
                    fastchan.shmem.write_u32_le(offset + 4, (freq >> 32) as u32)?;
                }
                Err(err) => status = Err(err),
            }
        }
        status
    }
}
