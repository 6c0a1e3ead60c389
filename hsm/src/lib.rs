//! # Hart State Management
//!
//! The HSM engine tracks the lifecycle of a set of RISC-V harts on behalf
//! of the service groups that need it (the HSM service group itself,
//! system suspend, CPPC).
//!
//! State changes are platform-observed: an operation moves a hart into a
//! *pending* state after running the platform prepare hook, and a later
//! reconciliation pass compares against the hardware state and runs the
//! finalize hook once the hardware caught up. Reconciliation is invoked
//! from the HSM service group's event tick and once after each lifecycle
//! operation.
//!
//! An [`Hsm`] instance is either a *leaf* managing harts directly through
//! a platform ops object, or a *composite* forwarding to child instances
//! by hart index. Children are owned by the caller; a composite merely
//! wires references and requires every child to expose the same
//! suspend-type list.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;

use rpmi_core::{Result, RpmiError};

/// HSM hart states, aligned with the SBI HSM extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HartState {
    /// Hart is executing.
    Started = 0,
    /// Hart is not executing.
    Stopped = 1,
    /// Start initiated, waiting for the hardware.
    StartPending = 2,
    /// Stop initiated, waiting for the hardware.
    StopPending = 3,
    /// Hart is suspended.
    Suspended = 4,
    /// Suspend initiated, waiting for the hardware.
    SuspendPending = 5,
    /// Resume initiated, waiting for the hardware.
    ResumePending = 6,
}

/// Hardware hart states reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HartHwState {
    /// Not executing instructions.
    Stopped,
    /// Executing instructions.
    Started,
    /// Idle (WFI or an equivalent low-power state).
    Suspended,
}

/// Suspend-type flag: the platform timer stops during this suspend state.
pub const SUSPEND_INFO_FLAGS_TIMER_STOP: u32 = 1;

/// Latency and residency description of one suspend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuspendInfo {
    /// Property flags (bit 0: timer stops).
    pub flags: u32,
    /// Entry latency in microseconds.
    pub entry_latency_us: u32,
    /// Exit latency in microseconds.
    pub exit_latency_us: u32,
    /// Wakeup latency in microseconds.
    pub wakeup_latency_us: u32,
    /// Minimum residency in microseconds.
    pub min_residency_us: u32,
}

/// A hart suspend type: the wire value plus its properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspendType {
    /// Suspend type value on the wire.
    pub value: u32,
    /// Latency and residency properties.
    pub info: SuspendInfo,
}

bitflags! {
    /// Lifecycle operations a platform implements.
    ///
    /// Stands in for the original's optional prepare/finalize callback
    /// pairs: a missing capability answers the operation with
    /// `NotSupported`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HsmCaps: u32 {
        /// `hart_start_prepare`/`hart_start_finalize` are meaningful.
        const HART_START = 1 << 0;
        /// `hart_stop_prepare`/`hart_stop_finalize` are meaningful.
        const HART_STOP = 1 << 1;
        /// `hart_suspend_prepare`/`hart_suspend_finalize` are meaningful.
        const HART_SUSPEND = 1 << 2;
    }
}

/// Platform operations of a leaf HSM.
///
/// All hooks are called with the per-hart lock held and must be
/// synchronous. Hart indices are local to the leaf.
pub trait HsmPlatform: Send + Sync {
    /// Current hardware state of a hart (mandatory).
    fn hart_get_hw_state(&self, hart_index: u32) -> HartHwState;

    /// Which lifecycle operations this platform supports.
    fn capabilities(&self) -> HsmCaps {
        HsmCaps::all()
    }

    /// Kick off a hart start.
    fn hart_start_prepare(&self, _hart_index: u32, _start_addr: u64) -> Result<()> {
        Ok(())
    }

    /// Complete a hart start once the hardware reports it running.
    fn hart_start_finalize(&self, _hart_index: u32, _start_addr: u64) {}

    /// Kick off a hart stop.
    fn hart_stop_prepare(&self, _hart_index: u32) -> Result<()> {
        Ok(())
    }

    /// Complete a hart stop once the hardware reports it idle.
    fn hart_stop_finalize(&self, _hart_index: u32) {}

    /// Kick off a hart suspend.
    fn hart_suspend_prepare(
        &self,
        _hart_index: u32,
        _suspend_type: &SuspendType,
        _resume_addr: u64,
    ) -> Result<()> {
        Ok(())
    }

    /// Complete a hart suspend once the hardware reports it suspended.
    fn hart_suspend_finalize(
        &self,
        _hart_index: u32,
        _suspend_type: &SuspendType,
        _resume_addr: u64,
    ) {
    }
}

/// Per-hart record; `state == None` means not yet reconciled with the
/// hardware.
#[derive(Debug, Default)]
struct HartSlot {
    state: Option<HartState>,
    start_addr: u64,
    resume_addr: u64,
    /// Index into the leaf's suspend-type array while a suspend is active.
    suspend_type: Option<usize>,
}

struct Leaf {
    hart_ids: Vec<u32>,
    harts: Vec<Mutex<HartSlot>>,
    suspend_types: Vec<SuspendType>,
    ops: Arc<dyn HsmPlatform>,
}

enum Kind {
    Leaf(Leaf),
    Composite(Vec<Arc<Hsm>>),
}

/// A hart state management instance: a leaf over a hart-ID array or a
/// composite over child instances.
pub struct Hsm {
    kind: Kind,
}

impl core::fmt::Debug for Hsm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.kind {
            Kind::Leaf(leaf) => f
                .debug_struct("Hsm::Leaf")
                .field("hart_ids", &leaf.hart_ids)
                .finish(),
            Kind::Composite(children) => f
                .debug_struct("Hsm::Composite")
                .field("children", &children.len())
                .finish(),
        }
    }
}

impl Hsm {
    /// Create a leaf HSM over `hart_ids` with the given suspend types and
    /// platform operations. Reconciles every hart once so states are
    /// classified from the hardware before the first request arrives.
    pub fn leaf(
        hart_ids: Vec<u32>,
        suspend_types: Vec<SuspendType>,
        ops: Arc<dyn HsmPlatform>,
    ) -> Result<Self> {
        if hart_ids.is_empty() {
            return Err(RpmiError::InvalidParam);
        }

        let harts = hart_ids.iter().map(|_| Mutex::new(HartSlot::default())).collect();
        let hsm = Self {
            kind: Kind::Leaf(Leaf {
                hart_ids,
                harts,
                suspend_types,
                ops,
            }),
        };
        hsm.process_state_changes();
        Ok(hsm)
    }

    /// Create a composite HSM over caller-owned children.
    ///
    /// Every child must expose the same suspend-type list (same count and
    /// per-entry value, flags and latencies); heterogeneous clusters are
    /// rejected with `InvalidParam`.
    pub fn composite(children: Vec<Arc<Hsm>>) -> Result<Self> {
        let Some(first) = children.first() else {
            return Err(RpmiError::InvalidParam);
        };

        let count = first.suspend_type_count();
        for child in &children[1..] {
            if child.suspend_type_count() != count {
                return Err(RpmiError::InvalidParam);
            }
            for index in 0..count {
                if child.suspend_type(index) != first.suspend_type(index) {
                    return Err(RpmiError::InvalidParam);
                }
            }
        }

        Ok(Self {
            kind: Kind::Composite(children),
        })
    }

    /// Number of harts managed by this instance; a composite sums its
    /// children.
    pub fn hart_count(&self) -> u32 {
        match &self.kind {
            Kind::Leaf(leaf) => leaf.hart_ids.len() as u32,
            Kind::Composite(children) => children.iter().map(|c| c.hart_count()).sum(),
        }
    }

    /// Child owning `hart_index` plus the index local to that child.
    fn locate(&self, hart_index: u32) -> Option<(&Arc<Hsm>, u32)> {
        let Kind::Composite(children) = &self.kind else {
            return None;
        };
        let mut base = 0;
        for child in children {
            let count = child.hart_count();
            if hart_index < base + count {
                return Some((child, hart_index - base));
            }
            base += count;
        }
        None
    }

    /// Hart ID at `hart_index`.
    pub fn hart_index2id(&self, hart_index: u32) -> Option<u32> {
        match &self.kind {
            Kind::Leaf(leaf) => leaf.hart_ids.get(hart_index as usize).copied(),
            Kind::Composite(_) => {
                let (child, local) = self.locate(hart_index)?;
                child.hart_index2id(local)
            }
        }
    }

    /// Hart index of `hart_id`.
    pub fn hart_id2index(&self, hart_id: u32) -> Option<u32> {
        match &self.kind {
            Kind::Leaf(leaf) => leaf
                .hart_ids
                .iter()
                .position(|&id| id == hart_id)
                .map(|i| i as u32),
            Kind::Composite(children) => {
                let mut base = 0;
                for child in children {
                    if let Some(local) = child.hart_id2index(hart_id) {
                        return Some(base + local);
                    }
                    base += child.hart_count();
                }
                None
            }
        }
    }

    /// Number of suspend types; a composite reads from its first child.
    pub fn suspend_type_count(&self) -> u32 {
        match &self.kind {
            Kind::Leaf(leaf) => leaf.suspend_types.len() as u32,
            Kind::Composite(children) => children[0].suspend_type_count(),
        }
    }

    /// Suspend type at `index`.
    pub fn suspend_type(&self, index: u32) -> Option<&SuspendType> {
        match &self.kind {
            Kind::Leaf(leaf) => leaf.suspend_types.get(index as usize),
            Kind::Composite(children) => children[0].suspend_type(index),
        }
    }

    /// Suspend type with the given wire value.
    pub fn find_suspend_type(&self, value: u32) -> Option<&SuspendType> {
        match &self.kind {
            Kind::Leaf(leaf) => leaf.suspend_types.iter().find(|t| t.value == value),
            Kind::Composite(children) => children[0].find_suspend_type(value),
        }
    }

    /// Start a hart at `start_addr`.
    pub fn hart_start(&self, hart_id: u32, start_addr: u64) -> Result<()> {
        match &self.kind {
            Kind::Leaf(leaf) => leaf.hart_start(hart_id, start_addr),
            Kind::Composite(_) => {
                let index = self.hart_id2index(hart_id).ok_or(RpmiError::InvalidParam)?;
                let (child, local) = self.locate(index).ok_or(RpmiError::InvalidParam)?;
                let local_id = child.hart_index2id(local).ok_or(RpmiError::InvalidParam)?;
                child.hart_start(local_id, start_addr)
            }
        }
    }

    /// Stop a hart.
    pub fn hart_stop(&self, hart_id: u32) -> Result<()> {
        match &self.kind {
            Kind::Leaf(leaf) => leaf.hart_stop(hart_id),
            Kind::Composite(_) => {
                let index = self.hart_id2index(hart_id).ok_or(RpmiError::InvalidParam)?;
                let (child, local) = self.locate(index).ok_or(RpmiError::InvalidParam)?;
                let local_id = child.hart_index2id(local).ok_or(RpmiError::InvalidParam)?;
                child.hart_stop(local_id)
            }
        }
    }

    /// Suspend a hart with `suspend_type`, resuming at `resume_addr` for
    /// non-retentive types.
    pub fn hart_suspend(
        &self,
        hart_id: u32,
        suspend_type: &SuspendType,
        resume_addr: u64,
    ) -> Result<()> {
        match &self.kind {
            Kind::Leaf(leaf) => leaf.hart_suspend(hart_id, suspend_type, resume_addr),
            Kind::Composite(_) => {
                let index = self.hart_id2index(hart_id).ok_or(RpmiError::InvalidParam)?;
                let (child, local) = self.locate(index).ok_or(RpmiError::InvalidParam)?;
                let local_id = child.hart_index2id(local).ok_or(RpmiError::InvalidParam)?;
                child.hart_suspend(local_id, suspend_type, resume_addr)
            }
        }
    }

    /// Current state of a hart.
    pub fn get_hart_state(&self, hart_id: u32) -> Result<HartState> {
        match &self.kind {
            Kind::Leaf(leaf) => {
                let index = leaf.index_of(hart_id)?;
                let slot = leaf.harts[index].lock();
                slot.state.ok_or(RpmiError::InvalidState)
            }
            Kind::Composite(_) => {
                let index = self.hart_id2index(hart_id).ok_or(RpmiError::InvalidParam)?;
                let (child, local) = self.locate(index).ok_or(RpmiError::InvalidParam)?;
                let local_id = child.hart_index2id(local).ok_or(RpmiError::InvalidParam)?;
                child.get_hart_state(local_id)
            }
        }
    }

    /// Reconcile every hart's state with the hardware.
    pub fn process_state_changes(&self) {
        match &self.kind {
            Kind::Leaf(leaf) => {
                for index in 0..leaf.harts.len() {
                    let mut slot = leaf.harts[index].lock();
                    leaf.reconcile(&mut slot, index as u32);
                }
            }
            Kind::Composite(children) => {
                for child in children {
                    child.process_state_changes();
                }
            }
        }
    }
}

impl Leaf {
    fn index_of(&self, hart_id: u32) -> Result<usize> {
        self.hart_ids
            .iter()
            .position(|&id| id == hart_id)
            .ok_or(RpmiError::InvalidParam)
    }

    /// Compare the cached state with the hardware and run finalize hooks.
    /// Caller holds the hart lock.
    fn reconcile(&self, slot: &mut HartSlot, hart_index: u32) {
        let hw_state = self.ops.hart_get_hw_state(hart_index);
        let Some(state) = slot.state else {
            slot.state = Some(match hw_state {
                HartHwState::Started => HartState::Started,
                HartHwState::Suspended => HartState::Suspended,
                HartHwState::Stopped => HartState::Stopped,
            });
            return;
        };

        match state {
            HartState::StartPending => {
                if hw_state == HartHwState::Started {
                    self.ops.hart_start_finalize(hart_index, slot.start_addr);
                    slot.state = Some(HartState::Started);
                }
            }
            HartState::StopPending => {
                if matches!(hw_state, HartHwState::Suspended | HartHwState::Stopped) {
                    self.ops.hart_stop_finalize(hart_index);
                    slot.state = Some(HartState::Stopped);
                }
            }
            HartState::SuspendPending => {
                if hw_state == HartHwState::Suspended {
                    if let Some(t) = slot.suspend_type {
                        self.ops.hart_suspend_finalize(
                            hart_index,
                            &self.suspend_types[t],
                            slot.resume_addr,
                        );
                    }
                    slot.state = Some(HartState::Suspended);
                }
            }
            HartState::Suspended => {
                // The hart woke itself up.
                if hw_state == HartHwState::Started {
                    slot.state = Some(HartState::Started);
                }
            }
            _ => {}
        }
    }

    fn hart_start(&self, hart_id: u32, start_addr: u64) -> Result<()> {
        if !self.ops.capabilities().contains(HsmCaps::HART_START) {
            return Err(RpmiError::NotSupported);
        }
        let index = self.index_of(hart_id)?;

        let mut slot = self.harts[index].lock();
        match slot.state {
            Some(HartState::Started) | Some(HartState::StartPending) => {
                return Err(RpmiError::Already);
            }
            Some(HartState::Stopped) => {}
            _ => {
                log::debug!("hsm: hart {hart_id:#x} start denied in current state");
                return Err(RpmiError::Denied);
            }
        }

        self.ops.hart_start_prepare(index as u32, start_addr)?;
        slot.start_addr = start_addr;
        slot.state = Some(HartState::StartPending);
        self.reconcile(&mut slot, index as u32);
        Ok(())
    }

    fn hart_stop(&self, hart_id: u32) -> Result<()> {
        if !self.ops.capabilities().contains(HsmCaps::HART_STOP) {
            return Err(RpmiError::NotSupported);
        }
        let index = self.index_of(hart_id)?;

        let mut slot = self.harts[index].lock();
        match slot.state {
            Some(HartState::Stopped) | Some(HartState::StopPending) => {
                return Err(RpmiError::Already);
            }
            Some(HartState::Started) => {}
            _ => {
                log::debug!("hsm: hart {hart_id:#x} stop denied in current state");
                return Err(RpmiError::Denied);
            }
        }

        self.ops.hart_stop_prepare(index as u32)?;
        slot.state = Some(HartState::StopPending);
        self.reconcile(&mut slot, index as u32);
        Ok(())
    }

    fn hart_suspend(
        &self,
        hart_id: u32,
        suspend_type: &SuspendType,
        resume_addr: u64,
    ) -> Result<()> {
        if !self.ops.capabilities().contains(HsmCaps::HART_SUSPEND) {
            return Err(RpmiError::NotSupported);
        }
        let type_index = self
            .suspend_types
            .iter()
            .position(|t| t.value == suspend_type.value)
            .ok_or(RpmiError::InvalidParam)?;
        let index = self.index_of(hart_id)?;

        let mut slot = self.harts[index].lock();
        match slot.state {
            Some(HartState::Suspended) | Some(HartState::SuspendPending) => {
                return Err(RpmiError::Already);
            }
            Some(HartState::Started) => {}
            _ => {
                log::debug!("hsm: hart {hart_id:#x} suspend denied in current state");
                return Err(RpmiError::Denied);
            }
        }

        self.ops
            .hart_suspend_prepare(index as u32, suspend_type, resume_addr)?;
        slot.suspend_type = Some(type_index);
        slot.resume_addr = resume_addr;
        slot.state = Some(HartState::SuspendPending);
        self.reconcile(&mut slot, index as u32);
        Ok(())
    }
}
