//! # Clock Tree Service Group
//!
//! Serves a hierarchical clock tree described by static per-clock data.
//! Clocks keep a parent link and a child list as indices into one owned
//! vector; runtime state (cached enable state and the enable count) sits
//! behind a per-clock lock.
//!
//! Enabling a clock enables its ancestors first; disabling is denied
//! while any child is enabled. Disabling never walks upward to release
//! parents (see the note on [`ClockGroup::set_state`]). A rate change
//! recalculates every descendant through the platform's recalc hook in a
//! pre-order walk.

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

/// Clock service IDs.
pub mod service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// Number of clocks.
    pub const GET_NUM_CLOCKS: u8 = 0x02;
    /// Static attributes of one clock.
    pub const GET_ATTRIBUTES: u8 = 0x03;
    /// Supported rates, paginated.
    pub const GET_SUPPORTED_RATES: u8 = 0x04;
    /// Enable or disable a clock.
    pub const SET_CONFIG: u8 = 0x05;
    /// Current enable state of a clock.
    pub const GET_CONFIG: u8 = 0x06;
    /// Change the rate of a clock.
    pub const SET_RATE: u8 = 0x07;
    /// Current rate of a clock.
    pub const GET_RATE: u8 = 0x08;
}

/// Rate representation of a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockFormat {
    /// An explicit array of supported rates.
    Discrete,
    /// A (min, max, step) triplet.
    Linear,
}

/// Clock gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    /// Clock is gated.
    Disabled,
    /// Clock is running.
    Enabled,
}

/// How the platform should round a requested rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RateMatch {
    /// Platform decides; no library-side tie-break is defined.
    Platform = 0,
    /// Round down to the closest supported rate.
    RoundDown = 1,
    /// Round up to the closest supported rate.
    RoundUp = 2,
}

impl RateMatch {
    fn from_flags(flags: u32) -> Option<Self> {
        match flags & 0b11 {
            0 => Some(Self::Platform),
            1 => Some(Self::RoundDown),
            2 => Some(Self::RoundUp),
            _ => None,
        }
    }
}

/// GET_ATTRIBUTES capability flag: rates are in the linear format.
pub const ATTRS_FLAG_LINEAR_FORMAT: u32 = 1 << 0;

const RATE_INVALID: u64 = u64::MAX;

/// Static description of one clock, indexed by clock ID.
#[derive(Debug, Clone)]
pub struct ClockData {
    /// Parent clock ID, or `None` for a root clock.
    pub parent: Option<u32>,
    /// Rate transition latency in milliseconds.
    pub transition_latency_ms: u32,
    /// Rate representation.
    pub format: ClockFormat,
    /// Clock name.
    pub name: &'static str,
    /// Supported rates: the full array for [`ClockFormat::Discrete`],
    /// exactly `[min, max, step]` for [`ClockFormat::Linear`].
    pub rates: Vec<u64>,
}

/// Platform clock operations, called with the owning clock's lock held.
pub trait ClockPlatform: Send + Sync {
    /// Gate or ungate a clock.
    fn set_state(&self, clock_id: u32, state: ClockState) -> Result<()>;

    /// Current state and rate of a clock. Must succeed for every clock at
    /// construction time so the tree starts deterministic.
    fn get_state_and_rate(&self, clock_id: u32) -> Result<(ClockState, u64)>;

    /// Whether the requested rate is outside the allowed margin and a
    /// rate change is actually required.
    fn rate_change_match(&self, clock_id: u32, rate: u64) -> bool;

    /// Change the rate; returns the rate actually set.
    fn set_rate(&self, clock_id: u32, rate_match: RateMatch, rate: u64) -> Result<u64>;

    /// Recalculate a child's rate after its parent changed; returns the
    /// child's new rate.
    fn set_rate_recalc(&self, clock_id: u32, parent_rate: u64) -> Result<u64>;
}

#[derive(Debug)]
struct ClockDyn {
    state: ClockState,
    /// Enable references held on this clock, on behalf of itself and its
    /// children.
    enable_count: u32,
}

struct ClockNode {
    data: ClockData,
    parent: Option<usize>,
    children: Vec<usize>,
    dynamic: Mutex<ClockDyn>,
}

/// The clock tree service group.
pub struct ClockGroup {
    clocks: Vec<ClockNode>,
    ops: Arc<dyn ClockPlatform>,
}

static SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(0),   // GET_NUM_CLOCKS
    ServiceSpec::new(4),   // GET_ATTRIBUTES
    ServiceSpec::new(8),   // GET_SUPPORTED_RATES
    ServiceSpec::new(8),   // SET_CONFIG
    ServiceSpec::new(4),   // GET_CONFIG
    ServiceSpec::new(16),  // SET_RATE
    ServiceSpec::new(4),   // GET_RATE
];

static INFO: GroupInfo = GroupInfo {
    name: "clk",
    group_id: group_id::CLOCK,
    version: rpmi_core::SPEC_VERSION,
    privilege: PrivilegeFlags::S_MODE.union(PrivilegeFlags::M_MODE),
    services: SERVICES,
};

impl ClockGroup {
    /// Build the clock tree from static clock data.
    ///
    /// Queries the platform for every clock's initial state so the cache
    /// starts deterministic, then links parents and children.
    pub fn new(clock_data: Vec<ClockData>, ops: Arc<dyn ClockPlatform>) -> Result<Arc<Self>> {
        if clock_data.is_empty() {
            return Err(RpmiError::InvalidParam);
        }
        let count = clock_data.len();

        let mut clocks = Vec::with_capacity(count);
        for (id, data) in clock_data.into_iter().enumerate() {
            if let Some(parent) = data.parent {
                if parent as usize >= count {
                    return Err(RpmiError::InvalidParam);
                }
            }
            if data.format == ClockFormat::Linear && data.rates.len() != 3 {
                return Err(RpmiError::InvalidParam);
            }

            let (state, _rate) = ops.get_state_and_rate(id as u32)?;
            clocks.push(ClockNode {
                parent: data.parent.map(|p| p as usize),
                data,
                children: Vec::new(),
                dynamic: Mutex::new(ClockDyn {
                    state,
                    enable_count: u32::from(state == ClockState::Enabled),
                }),
            });
        }

        for id in 0..count {
            let child_enabled = clocks[id].dynamic.lock().state == ClockState::Enabled;
            if let Some(parent) = clocks[id].parent {
                clocks[parent].children.push(id);
                // A child that starts enabled holds a reference on its
                // parent from the outset.
                if child_enabled {
                    clocks[parent].dynamic.lock().enable_count += 1;
                }
            }
        }

        Ok(Arc::new(Self { clocks, ops }))
    }

    /// Number of clocks in the tree.
    pub fn num_clocks(&self) -> u32 {
        self.clocks.len() as u32
    }

    fn clock(&self, clock_id: u32) -> Result<&ClockNode> {
        self.clocks
            .get(clock_id as usize)
            .ok_or(RpmiError::InvalidParam)
    }

    /// Change the gate state of a clock.
    ///
    /// Enable walks up: a parented clock first enables its parent chain
    /// (an already-enabled ancestor is fine). Disable is denied while any
    /// child is enabled. Disable deliberately does not release parent
    /// enable counts; the asymmetry matches the platform contract.
    pub fn set_state(&self, clock_id: u32, state: ClockState) -> Result<()> {
        self.clock(clock_id)?;
        match state {
            ClockState::Enabled => self.enable(clock_id as usize, false),
            ClockState::Disabled => self.disable(clock_id as usize),
        }
    }

    /// `from_child` marks a recursive call: the child takes an enable
    /// reference on this clock even when it is already running.
    fn enable(&self, index: usize, from_child: bool) -> Result<()> {
        let node = &self.clocks[index];
        let mut dynamic = node.dynamic.lock();

        if dynamic.state == ClockState::Enabled {
            if from_child {
                dynamic.enable_count += 1;
                return Ok(());
            }
            return Err(RpmiError::Already);
        }

        if let Some(parent) = node.parent {
            self.enable(parent, true)?;
        }

        self.ops.set_state(index as u32, ClockState::Enabled)?;
        dynamic.state = ClockState::Enabled;
        dynamic.enable_count += 1;
        if from_child {
            dynamic.enable_count += 1;
        }
        Ok(())
    }

    /// Disable never walks upward: references this clock holds on its
    /// parents stay in place (the platform contract keeps the asymmetry).
    fn disable(&self, index: usize) -> Result<()> {
        let node = &self.clocks[index];
        let mut dynamic = node.dynamic.lock();

        if dynamic.state == ClockState::Disabled {
            return Err(RpmiError::Already);
        }

        // A leaf, or a parent holding only its own reference, gates
        // directly; otherwise every child must be disabled first.
        if !node.children.is_empty() && dynamic.enable_count != 1 {
            for &child in &node.children {
                if self.clocks[child].dynamic.lock().state == ClockState::Enabled {
                    return Err(RpmiError::Denied);
                }
            }
        }

        self.ops.set_state(index as u32, ClockState::Disabled)?;
        dynamic.state = ClockState::Disabled;
        dynamic.enable_count = dynamic.enable_count.saturating_sub(1);
        Ok(())
    }

    /// Change the rate of a clock and propagate through its subtree.
    pub fn set_rate(&self, clock_id: u32, rate_match: RateMatch, rate: u64) -> Result<()> {
        let node = self.clock(clock_id)?;

        let dynamic = node.dynamic.lock();
        if dynamic.state == ClockState::Disabled {
            return Err(RpmiError::Denied);
        }

        if !self.ops.rate_change_match(clock_id, rate) {
            return Err(RpmiError::Already);
        }

        let new_rate = self.ops.set_rate(clock_id, rate_match, rate)?;
        self.update_rate_tree(clock_id as usize, new_rate)
    }

    /// Recalculate every descendant from its parent's new rate,
    /// pre-order. The caller holds the origin clock's lock.
    fn update_rate_tree(&self, index: usize, parent_rate: u64) -> Result<()> {
        for &child in &self.clocks[index].children {
            let _guard = self.clocks[child].dynamic.lock();
            let new_rate = self.ops.set_rate_recalc(child as u32, parent_rate)?;
            drop(_guard);
            self.update_rate_tree(child, new_rate)?;
        }
        Ok(())
    }

    fn get_state(&self, clock_id: u32) -> Result<ClockState> {
        self.clock(clock_id)?;
        let (state, _) = self.ops.get_state_and_rate(clock_id)?;
        Ok(state)
    }

    fn get_rate(&self, clock_id: u32) -> Result<u64> {
        self.clock(clock_id)?;
        let (_, rate) = self.ops.get_state_and_rate(clock_id)?;
        Ok(rate)
    }
}

impl ServiceGroup for ClockGroup {
    fn info(&self) -> &GroupInfo {
        &INFO
    }

    fn handle_request(&self, call: &ServiceCall<'_>, rsp: &mut ResponseWriter<'_>) -> Result<()> {
        let req = call.reader();
        match call.service_id {
            service::GET_NUM_CLOCKS => {
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(self.num_clocks());
            }
            service::GET_ATTRIBUTES => {
                let Ok(node) = self.clock(req.u32(0)) else {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                };
                let mut flags = 0;
                if node.data.format == ClockFormat::Linear {
                    flags |= ATTRS_FLAG_LINEAR_FORMAT;
                }
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(flags);
                rsp.put_u32(node.data.rates.len() as u32);
                rsp.put_u32(node.data.transition_latency_ms);
                rsp.put_name(node.data.name, NAME_MAX_LEN);
            }
            service::GET_SUPPORTED_RATES => {
                let Ok(node) = self.clock(req.u32(0)) else {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                };
                let rates = &node.data.rates;
                if rates.is_empty() {
                    rsp.put_i32(RpmiError::NotSupported.code());
                    return Ok(());
                }

                let start = req.u32(1);
                match node.data.format {
                    ClockFormat::Linear => {
                        // Always the full (min, max, step) triplet.
                        rsp.put_i32(STATUS_SUCCESS);
                        rsp.put_u32(0);
                        rsp.put_u32(0);
                        rsp.put_u32(3);
                        for &rate in rates.iter() {
                            rsp.put_u64(rate);
                        }
                    }
                    ClockFormat::Discrete => {
                        let total = rates.len() as u32;
                        if start > total {
                            rsp.put_i32(RpmiError::InvalidParam.code());
                            return Ok(());
                        }
                        let max_rates = ((call.max_data_len() - 4 * 4) / 8) as u32;
                        let returned = max_rates.min(total - start);
                        rsp.put_i32(STATUS_SUCCESS);
                        rsp.put_u32(0);
                        rsp.put_u32(total - (start + returned));
                        rsp.put_u32(returned);
                        for i in 0..returned {
                            rsp.put_u64(rates[(start + i) as usize]);
                        }
                    }
                }
            }
            service::SET_CONFIG => {
                let clock_id = req.u32(0);
                let config = req.u32(1);
                let state = if config & 1 != 0 {
                    ClockState::Enabled
                } else {
                    ClockState::Disabled
                };
                let result = self.set_state(clock_id, state);
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            service::GET_CONFIG => match self.get_state(req.u32(0)) {
                Ok(state) => {
                    rsp.put_i32(STATUS_SUCCESS);
                    rsp.put_u32(u32::from(state == ClockState::Enabled));
                }
                Err(err) => rsp.put_i32(err.code()),
            },
            service::SET_RATE => {
                let clock_id = req.u32(0);
                let flags = req.u32(1);
                let rate = req.u64(2);

                let Some(rate_match) = RateMatch::from_flags(flags) else {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                };
                if rate == 0 || rate == RATE_INVALID {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                let result = self.set_rate(clock_id, rate_match, rate);
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            service::GET_RATE => match self.get_rate(req.u32(0)) {
                Ok(rate) => {
                    rsp.put_i32(STATUS_SUCCESS);
                    rsp.put_u64(rate);
                }
                Err(err) => rsp.put_i32(err.code()),
            },
            _ => rsp.put_i32(RpmiError::NotSupported.code()),
        }
        Ok(())
    }
}
