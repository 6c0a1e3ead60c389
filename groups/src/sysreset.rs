//! # System Reset Service Group
//!
//! Serves shutdown and reboot requests against a platform-supplied list
//! of supported reset types. The reset callback is expected not to
//! return; if the platform comes back anyway the request is answered as
//! invalid.

use alloc::sync::Arc;
use alloc::vec::Vec;

use rpmi_core::error::STATUS_SUCCESS;
use rpmi_core::message::ResponseWriter;
use rpmi_core::{
    group_id, GroupInfo, PrivilegeFlags, Result, RpmiError, ServiceCall, ServiceGroup,
    ServiceSpec,
};

/// System reset service IDs.
pub mod service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// Query attributes of a reset type.
    pub const GET_ATTRIBUTES: u8 = 0x02;
    /// Perform a system reset.
    pub const SYSTEM_RESET: u8 = 0x03;
}

/// Shutdown the system.
pub const RESET_TYPE_SHUTDOWN: u32 = 0;
/// Power-cycle the system.
pub const RESET_TYPE_COLD_REBOOT: u32 = 1;
/// Reboot without a power cycle.
pub const RESET_TYPE_WARM_REBOOT: u32 = 2;

/// GET_ATTRIBUTES flag: the queried reset type is supported.
pub const ATTRS_FLAG_RESET_TYPE: u32 = 1;

/// Platform operations for system reset.
pub trait SysResetPlatform: Send + Sync {
    /// Perform the reset. Not expected to return.
    fn do_system_reset(&self, reset_type: u32);
}

/// The system reset service group.
pub struct SysResetGroup {
    reset_types: Vec<u32>,
    ops: Arc<dyn SysResetPlatform>,
}

static SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(4),   // GET_ATTRIBUTES
    ServiceSpec::new(4),   // SYSTEM_RESET
];

static INFO: GroupInfo = GroupInfo {
    name: "sysreset",
    group_id: group_id::SYSTEM_RESET,
    version: rpmi_core::SPEC_VERSION,
    privilege: PrivilegeFlags::M_MODE,
    services: SERVICES,
};

impl SysResetGroup {
    /// Create a system reset group over the supported reset types.
    pub fn new(reset_types: Vec<u32>, ops: Arc<dyn SysResetPlatform>) -> Result<Arc<Self>> {
        if reset_types.is_empty() {
            return Err(RpmiError::InvalidParam);
        }
        Ok(Arc::new(Self { reset_types, ops }))
    }

    fn supports(&self, reset_type: u32) -> bool {
        self.reset_types.contains(&reset_type)
    }
}

impl ServiceGroup for SysResetGroup {
    fn info(&self) -> &GroupInfo {
        &INFO
    }

    fn handle_request(&self, call: &ServiceCall<'_>, rsp: &mut ResponseWriter<'_>) -> Result<()> {
        let req = call.reader();
        match call.service_id {
            service::GET_ATTRIBUTES => {
                let reset_type = req.u32(0);
                let attrs = if self.supports(reset_type) {
                    ATTRS_FLAG_RESET_TYPE
                } else {
                    0
                };
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(attrs);
            }
            service::SYSTEM_RESET => {
                let reset_type = req.u32(0);
                if self.supports(reset_type) {
                    // No returning back after this call.
                    self.ops.do_system_reset(reset_type);
                }
                rsp.put_i32(RpmiError::InvalidParam.code());
            }
            _ => rsp.put_i32(RpmiError::NotSupported.code()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{err_word, invoke};
    use alloc::vec;
    use spin::Mutex;

    struct FakeReset {
        requested: Mutex<Option<u32>>,
    }

    impl SysResetPlatform for FakeReset {
        fn do_system_reset(&self, reset_type: u32) {
            *self.requested.lock() = Some(reset_type);
        }
    }

    fn make_group() -> (Arc<FakeReset>, Arc<SysResetGroup>) {
        let plat = Arc::new(FakeReset {
            requested: Mutex::new(None),
        });
        let group = SysResetGroup::new(
            vec![RESET_TYPE_SHUTDOWN, RESET_TYPE_COLD_REBOOT],
            plat.clone(),
        )
        .unwrap();
        (plat, group)
    }

    #[test]
    fn attributes_flag_supported_types() {
        let (_, group) = make_group();
        let reply = invoke(&*group, service::GET_ATTRIBUTES, &[RESET_TYPE_COLD_REBOOT]);
        assert_eq!(reply, [0, 1]);

        let reply = invoke(&*group, service::GET_ATTRIBUTES, &[RESET_TYPE_WARM_REBOOT]);
        assert_eq!(reply, [0, 0]);
    }

    #[test]
    fn reset_calls_platform_for_supported_type() {
        let (plat, group) = make_group();
        // The platform fake returns, so the handler falls through to the
        // invalid-parameter reply; a real platform never comes back.
        let reply = invoke(&*group, service::SYSTEM_RESET, &[RESET_TYPE_SHUTDOWN]);
        assert_eq!(*plat.requested.lock(), Some(RESET_TYPE_SHUTDOWN));
        assert_eq!(reply, [err_word(RpmiError::InvalidParam)]);
    }

    #[test]
    fn reset_rejects_unsupported_type() {
        let (plat, group) = make_group();
        let reply = invoke(&*group, service::SYSTEM_RESET, &[RESET_TYPE_WARM_REBOOT]);
        assert_eq!(*plat.requested.lock(), None);
        assert_eq!(reply, [err_word(RpmiError::InvalidParam)]);
    }

    #[test]
    fn empty_type_list_rejected() {
        let plat = Arc::new(FakeReset {
            requested: Mutex::new(None),
        });
        assert!(SysResetGroup::new(vec![], plat).is_err());
    }
}
