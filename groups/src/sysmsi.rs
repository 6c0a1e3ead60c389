//! # System MSI Service Group
//!
//! Models system-level MSIs as level-triggered sources converted to
//! edges: a source is *injected* by marking it pending, and the event
//! tick performs the actual word write to the configured target address
//! for every source that is enabled, pending, and has a validated
//! target. One source may be designated as the P2A doorbell the context
//! rings after acknowledgements.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use rpmi_core::error::STATUS_SUCCESS;
use rpmi_core::message::ResponseWriter;
use rpmi_core::{
    group_id, GroupInfo, PrivilegeFlags, Result, RpmiError, ServiceCall, ServiceGroup,
    ServiceSpec,
};

use crate::NAME_MAX_LEN;

/// System MSI service IDs.
pub mod service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// Query group attributes.
    pub const GET_ATTRIBUTES: u8 = 0x02;
    /// Query attributes of one MSI.
    pub const GET_MSI_ATTRIBUTES: u8 = 0x03;
    /// Enable or disable one MSI.
    pub const SET_MSI_STATE: u8 = 0x04;
    /// Query enable/pending state of one MSI.
    pub const GET_MSI_STATE: u8 = 0x05;
    /// Configure the target address and data of one MSI.
    pub const SET_MSI_TARGET: u8 = 0x06;
    /// Query the target address and data of one MSI.
    pub const GET_MSI_TARGET: u8 = 0x07;
}

/// MSI state word: enable bit.
pub const MSI_STATE_ENABLE: u32 = 1 << 0;
/// MSI state word: pending bit.
pub const MSI_STATE_PENDING: u32 = 1 << 1;

/// Per-MSI attribute flag: M-mode is the preferred handler.
pub const MSI_ATTRS_FLAG_PREF_M_MODE: u32 = 1 << 0;

/// Platform operations for system MSIs.
pub trait SysMsiPlatform: Send + Sync {
    /// Whether `msi_addr` is an acceptable MSI target (mandatory).
    fn validate_msi_addr(&self, msi_addr: u64) -> bool;

    /// Whether M-mode is the preferred handler of the given MSI.
    fn mmode_preferred(&self, _msi_index: u32) -> bool {
        false
    }

    /// Name of the given MSI, if the platform assigns one.
    fn msi_name(&self, _msi_index: u32) -> Option<String> {
        None
    }

    /// Perform the MSI injection: a 32-bit write of `data` to `addr`.
    fn write_msi(&self, addr: u64, data: u32);
}

#[derive(Debug, Clone, Copy, Default)]
struct MsiRecord {
    enable: bool,
    pending: bool,
    /// A target has been configured and validated.
    valid: bool,
    target_addr: u64,
    target_data: u32,
}

/// The system MSI service group.
pub struct SysMsiGroup {
    num_msi: u32,
    /// MSI index rung as the P2A doorbell; `num_msi` means none.
    p2a_msi_index: u32,
    ops: Arc<dyn SysMsiPlatform>,
    msis: Mutex<Vec<MsiRecord>>,
}

static SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(0),   // GET_ATTRIBUTES
    ServiceSpec::new(4),   // GET_MSI_ATTRIBUTES
    ServiceSpec::new(8),   // SET_MSI_STATE
    ServiceSpec::new(4),   // GET_MSI_STATE
    ServiceSpec::new(16),  // SET_MSI_TARGET
    ServiceSpec::new(4),   // GET_MSI_TARGET
];

static INFO: GroupInfo = GroupInfo {
    name: "sysmsi",
    group_id: group_id::SYSTEM_MSI,
    version: rpmi_core::SPEC_VERSION,
    privilege: PrivilegeFlags::S_MODE.union(PrivilegeFlags::M_MODE),
    services: SERVICES,
};

impl SysMsiGroup {
    /// Create a system MSI group with `num_msi` sources.
    ///
    /// `p2a_msi_index` selects the P2A doorbell source; pass a value of
    /// at least `num_msi` when no doorbell exists.
    pub fn new(
        num_msi: u32,
        p2a_msi_index: u32,
        ops: Arc<dyn SysMsiPlatform>,
    ) -> Result<Arc<Self>> {
        if num_msi == 0 {
            return Err(RpmiError::InvalidParam);
        }
        Ok(Arc::new(Self {
            num_msi,
            p2a_msi_index,
            ops,
            msis: Mutex::new(vec![MsiRecord::default(); num_msi as usize]),
        }))
    }

    /// Number of MSI sources.
    pub fn num_msi(&self) -> u32 {
        self.num_msi
    }

    /// Mark an MSI pending and deliver whatever is deliverable.
    pub fn inject(&self, msi_index: u32) -> Result<()> {
        if msi_index >= self.num_msi {
            return Err(RpmiError::InvalidParam);
        }
        let mut msis = self.msis.lock();
        msis[msi_index as usize].pending = true;
        self.deliver_pending(&mut msis);
        Ok(())
    }

    /// Inject the configured P2A doorbell MSI.
    pub fn inject_p2a(&self) -> Result<()> {
        if self.p2a_msi_index >= self.num_msi {
            return Err(RpmiError::NotSupported);
        }
        self.inject(self.p2a_msi_index)
    }

    /// Caller holds the group lock.
    fn deliver_pending(&self, msis: &mut [MsiRecord]) {
        for msi in msis.iter_mut() {
            if msi.enable && msi.pending && msi.valid {
                self.ops.write_msi(msi.target_addr, msi.target_data);
                msi.pending = false;
            }
        }
    }
}

impl ServiceGroup for SysMsiGroup {
    fn info(&self) -> &GroupInfo {
        &INFO
    }

    fn handle_request(&self, call: &ServiceCall<'_>, rsp: &mut ResponseWriter<'_>) -> Result<()> {
        let req = call.reader();
        match call.service_id {
            service::GET_ATTRIBUTES => {
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(self.num_msi);
                rsp.put_u32(0);
                rsp.put_u32(0);
            }
            service::GET_MSI_ATTRIBUTES => {
                let index = req.u32(0);
                if index >= self.num_msi {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                let mut flags = 0;
                if self.ops.mmode_preferred(index) {
                    flags |= MSI_ATTRS_FLAG_PREF_M_MODE;
                }
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(flags);
                for _ in 0..5 {
                    rsp.put_u32(0);
                }
                let name = self.ops.msi_name(index).unwrap_or_default();
                rsp.put_name(&name, NAME_MAX_LEN);
            }
            service::SET_MSI_STATE => {
                let index = req.u32(0);
                if index >= self.num_msi {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                let state = req.u32(1);
                self.msis.lock()[index as usize].enable = state & MSI_STATE_ENABLE != 0;
                rsp.put_i32(STATUS_SUCCESS);
            }
            service::GET_MSI_STATE => {
                let index = req.u32(0);
                if index >= self.num_msi {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                let msi = self.msis.lock()[index as usize];
                let mut state = 0;
                if msi.enable {
                    state |= MSI_STATE_ENABLE;
                }
                if msi.pending {
                    state |= MSI_STATE_PENDING;
                }
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(state);
            }
            service::SET_MSI_TARGET => {
                let index = req.u32(0);
                if index >= self.num_msi {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                let addr = req.u64(1);
                let data = req.u32(3);
                if !self.ops.validate_msi_addr(addr) {
                    rsp.put_i32(RpmiError::InvalidAddr.code());
                    return Ok(());
                }
                let mut msis = self.msis.lock();
                let msi = &mut msis[index as usize];
                msi.target_addr = addr;
                msi.target_data = data;
                msi.valid = true;
                rsp.put_i32(STATUS_SUCCESS);
            }
            service::GET_MSI_TARGET => {
                let index = req.u32(0);
                if index >= self.num_msi {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    return Ok(());
                }
                let msi = self.msis.lock()[index as usize];
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u64(msi.target_addr);
                rsp.put_u32(msi.target_data);
            }
            _ => rsp.put_i32(RpmiError::NotSupported.code()),
        }
        Ok(())
    }

    fn process_events(&self) -> Result<()> {
        let mut msis = self.msis.lock();
        self.deliver_pending(&mut msis);
        Ok(())
    }

    fn inject_p2a_doorbell(&self) -> Result<()> {
        self.inject_p2a()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{err_word, invoke};
    use alloc::string::ToString;

    /// Accepts addresses inside a 4 KiB window at 0x2400_0000 and records
    /// every MSI write.
    struct FakeMsiPlatform {
        writes: Mutex<Vec<(u64, u32)>>,
    }

    impl FakeMsiPlatform {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: Mutex::new(Vec::new()),
            })
        }
    }

    impl SysMsiPlatform for FakeMsiPlatform {
        fn validate_msi_addr(&self, msi_addr: u64) -> bool {
            (0x2400_0000..0x2400_1000).contains(&msi_addr)
        }

        fn mmode_preferred(&self, msi_index: u32) -> bool {
            msi_index == 0
        }

        fn msi_name(&self, msi_index: u32) -> Option<String> {
            (msi_index == 0).then(|| "p2a-db".to_string())
        }

        fn write_msi(&self, addr: u64, data: u32) {
            self.writes.lock().push((addr, data));
        }
    }

    fn arm(group: &SysMsiGroup, index: u32, addr: u64, data: u32) {
        let reply = invoke(
            group,
            service::SET_MSI_TARGET,
            &[index, addr as u32, (addr >> 32) as u32, data],
        );
        assert_eq!(reply, [0]);
        let reply = invoke(group, service::SET_MSI_STATE, &[index, MSI_STATE_ENABLE]);
        assert_eq!(reply, [0]);
    }

    #[test]
    fn group_attributes() {
        let group = SysMsiGroup::new(4, 0, FakeMsiPlatform::new()).unwrap();
        assert_eq!(invoke(&*group, service::GET_ATTRIBUTES, &[]), [0, 4, 0, 0]);
    }

    #[test]
    fn msi_attributes_carry_preference_and_name() {
        let group = SysMsiGroup::new(2, 0, FakeMsiPlatform::new()).unwrap();
        let reply = invoke(&*group, service::GET_MSI_ATTRIBUTES, &[0]);
        assert_eq!(&reply[..7], [0, MSI_ATTRS_FLAG_PREF_M_MODE, 0, 0, 0, 0, 0]);
        assert_eq!(reply[7].to_le_bytes(), *b"p2a-");

        let reply = invoke(&*group, service::GET_MSI_ATTRIBUTES, &[1]);
        assert_eq!(&reply[..7], [0, 0, 0, 0, 0, 0, 0]);

        let reply = invoke(&*group, service::GET_MSI_ATTRIBUTES, &[2]);
        assert_eq!(reply, [err_word(RpmiError::InvalidParam)]);
    }

    #[test]
    fn target_validation_and_readback() {
        let group = SysMsiGroup::new(1, 1, FakeMsiPlatform::new()).unwrap();

        let reply = invoke(&*group, service::SET_MSI_TARGET, &[0, 0x100, 0, 7]);
        assert_eq!(reply, [err_word(RpmiError::InvalidAddr)]);

        arm(&group, 0, 0x2400_0040, 0x11);
        let reply = invoke(&*group, service::GET_MSI_TARGET, &[0]);
        assert_eq!(reply, [0, 0x2400_0040, 0, 0x11]);
    }

    #[test]
    fn injection_requires_enable_pending_and_valid_target() {
        let plat = FakeMsiPlatform::new();
        let group = SysMsiGroup::new(2, 2, plat.clone()).unwrap();

        // Pending without a target: nothing is written.
        group.inject(0).unwrap();
        assert!(plat.writes.lock().is_empty());
        let reply = invoke(&*group, service::GET_MSI_STATE, &[0]);
        assert_eq!(reply, [0, MSI_STATE_PENDING]);

        // Arming the source delivers the stored pending edge on the next
        // tick and clears it.
        arm(&group, 0, 0x2400_0000, 0xAB);
        group.process_events().unwrap();
        assert_eq!(plat.writes.lock().as_slice(), [(0x2400_0000, 0xAB)]);
        let reply = invoke(&*group, service::GET_MSI_STATE, &[0]);
        assert_eq!(reply, [0, MSI_STATE_ENABLE]);

        // Disabled sources hold their pending bit.
        arm(&group, 1, 0x2400_0008, 0xCD);
        invoke(&*group, service::SET_MSI_STATE, &[1, 0]);
        group.inject(1).unwrap();
        assert_eq!(plat.writes.lock().len(), 1);
    }

    #[test]
    fn p2a_doorbell_injection() {
        let plat = FakeMsiPlatform::new();
        let group = SysMsiGroup::new(2, 1, plat.clone()).unwrap();
        arm(&group, 1, 0x2400_0010, 0x99);

        group.inject_p2a().unwrap();
        assert_eq!(plat.writes.lock().as_slice(), [(0x2400_0010, 0x99)]);

        let without = SysMsiGroup::new(2, 2, plat).unwrap();
        assert_eq!(without.inject_p2a(), Err(RpmiError::NotSupported));
        assert_eq!(without.inject(5), Err(RpmiError::InvalidParam));
    }
}
