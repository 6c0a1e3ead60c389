//! # Hart State Management Service Group
//!
//! Wraps an [`rpmi_hsm::Hsm`] instance with the wire services: hart
//! start/stop/suspend, status queries, and the paginated hart and
//! suspend-type listings. The event tick reconciles every hart's cached
//! state with the hardware.
//!
//! Admitted only to M-mode contexts.

use alloc::sync::Arc;

use rpmi_core::error::STATUS_SUCCESS;
use rpmi_core::message::ResponseWriter;
use rpmi_core::{
    group_id, GroupInfo, PrivilegeFlags, Result, RpmiError, ServiceCall, ServiceGroup,
    ServiceSpec,
};
use rpmi_hsm::Hsm;

/// HSM service IDs.
pub mod service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// Query the state of one hart.
    pub const GET_HART_STATUS: u8 = 0x02;
    /// List managed hart IDs, paginated.
    pub const GET_HART_LIST: u8 = 0x03;
    /// List supported suspend type values, paginated.
    pub const GET_SUSPEND_TYPES: u8 = 0x04;
    /// Query latency/residency properties of a suspend type.
    pub const GET_SUSPEND_INFO: u8 = 0x05;
    /// Start a hart.
    pub const HART_START: u8 = 0x06;
    /// Stop a hart.
    pub const HART_STOP: u8 = 0x07;
    /// Suspend a hart.
    pub const HART_SUSPEND: u8 = 0x08;
}

/// The HSM service group.
pub struct HsmGroup {
    hsm: Arc<Hsm>,
}

static SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(4),   // GET_HART_STATUS
    ServiceSpec::new(4),   // GET_HART_LIST
    ServiceSpec::new(4),   // GET_SUSPEND_TYPES
    ServiceSpec::new(4),   // GET_SUSPEND_INFO
    ServiceSpec::new(12),  // HART_START
    ServiceSpec::new(4),   // HART_STOP
    ServiceSpec::new(16),  // HART_SUSPEND
];

static INFO: GroupInfo = GroupInfo {
    name: "hsm",
    group_id: group_id::HSM,
    version: rpmi_core::SPEC_VERSION,
    privilege: PrivilegeFlags::M_MODE,
    services: SERVICES,
};

/// Entries that fit a paginated list reply after the three header words.
fn max_list_entries(call: &ServiceCall<'_>) -> u32 {
    ((call.max_data_len() - 3 * 4) / 4) as u32
}

impl HsmGroup {
    /// Create an HSM service group over `hsm`.
    pub fn new(hsm: Arc<Hsm>) -> Arc<Self> {
        Arc::new(Self { hsm })
    }

    /// The wrapped HSM instance.
    pub fn hsm(&self) -> &Arc<Hsm> {
        &self.hsm
    }

    /// Paginated reply: (status, remaining, returned, values...).
    fn list_reply(
        &self,
        call: &ServiceCall<'_>,
        rsp: &mut ResponseWriter<'_>,
        total: u32,
        start: u32,
        value_at: impl Fn(u32) -> u32,
    ) {
        if start > total {
            rsp.put_i32(RpmiError::InvalidParam.code());
            rsp.put_u32(total);
            rsp.put_u32(0);
            return;
        }

        let returned = max_list_entries(call).min(total - start);
        rsp.put_i32(STATUS_SUCCESS);
        rsp.put_u32(total - (start + returned));
        rsp.put_u32(returned);
        for i in 0..returned {
            rsp.put_u32(value_at(start + i));
        }
    }
}

impl ServiceGroup for HsmGroup {
    fn info(&self) -> &GroupInfo {
        &INFO
    }

    fn handle_request(&self, call: &ServiceCall<'_>, rsp: &mut ResponseWriter<'_>) -> Result<()> {
        let req = call.reader();
        match call.service_id {
            service::HART_START => {
                let hart_id = req.u32(0);
                let start_addr = req.u64(1);
                let result = self.hsm.hart_start(hart_id, start_addr);
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            service::HART_STOP => {
                let result = self.hsm.hart_stop(req.u32(0));
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            service::HART_SUSPEND => {
                let hart_id = req.u32(0);
                let type_value = req.u32(1);
                let resume_addr = req.u64(2);
                let result = match self.hsm.find_suspend_type(type_value) {
                    Some(suspend_type) => {
                        let suspend_type = *suspend_type;
                        self.hsm.hart_suspend(hart_id, &suspend_type, resume_addr)
                    }
                    None => Err(RpmiError::InvalidParam),
                };
                rsp.put_i32(rpmi_core::error::status_code(&result));
            }
            service::GET_HART_STATUS => match self.hsm.get_hart_state(req.u32(0)) {
                Ok(state) => {
                    rsp.put_i32(STATUS_SUCCESS);
                    rsp.put_u32(state as u32);
                }
                Err(err) => {
                    rsp.put_i32(err.code());
                    rsp.put_u32(0);
                }
            },
            service::GET_HART_LIST => {
                let start = req.u32(0);
                self.list_reply(call, rsp, self.hsm.hart_count(), start, |index| {
                    self.hsm.hart_index2id(index).unwrap_or(u32::MAX)
                });
            }
            service::GET_SUSPEND_TYPES => {
                let start = req.u32(0);
                self.list_reply(call, rsp, self.hsm.suspend_type_count(), start, |index| {
                    self.hsm.suspend_type(index).map_or(u32::MAX, |t| t.value)
                });
            }
            service::GET_SUSPEND_INFO => match self.hsm.find_suspend_type(req.u32(0)) {
                Some(suspend_type) => {
                    rsp.put_i32(STATUS_SUCCESS);
                    rsp.put_u32(suspend_type.info.flags);
                    rsp.put_u32(suspend_type.info.entry_latency_us);
                    rsp.put_u32(suspend_type.info.exit_latency_us);
                    rsp.put_u32(suspend_type.info.wakeup_latency_us);
                    rsp.put_u32(suspend_type.info.min_residency_us);
                }
                None => {
                    rsp.put_i32(RpmiError::InvalidParam.code());
                    for _ in 0..5 {
                        rsp.put_u32(0);
                    }
                }
            },
            _ => rsp.put_i32(RpmiError::NotSupported.code()),
        }
        Ok(())
    }

    fn process_events(&self) -> Result<()> {
        self.hsm.process_state_changes();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{err_word, invoke, invoke_slot};
    use alloc::vec;
    use alloc::vec::Vec;
    use spin::Mutex;
    use rpmi_hsm::{HartHwState, HartState, HsmPlatform, SuspendInfo, SuspendType};

    struct FakeHarts {
        hw: Mutex<Vec<HartHwState>>,
        /// Hardware follows stop requests immediately when set.
        auto_stop: bool,
    }

    impl HsmPlatform for FakeHarts {
        fn hart_get_hw_state(&self, hart_index: u32) -> HartHwState {
            self.hw.lock()[hart_index as usize]
        }

        fn hart_stop_prepare(&self, hart_index: u32) -> Result<()> {
            if self.auto_stop {
                self.hw.lock()[hart_index as usize] = HartHwState::Stopped;
            }
            Ok(())
        }
    }

    fn make_group(ids: &[u32], auto_stop: bool) -> (Arc<FakeHarts>, Arc<HsmGroup>) {
        let plat = Arc::new(FakeHarts {
            hw: Mutex::new(vec![HartHwState::Started; ids.len()]),
            auto_stop,
        });
        let hsm = Arc::new(
            Hsm::leaf(
                ids.to_vec(),
                vec![
                    SuspendType {
                        value: 0,
                        info: SuspendInfo {
                            flags: 1,
                            entry_latency_us: 10,
                            exit_latency_us: 20,
                            wakeup_latency_us: 30,
                            min_residency_us: 100,
                        },
                    },
                    SuspendType {
                        value: 3,
                        info: SuspendInfo::default(),
                    },
                ],
                plat.clone(),
            )
            .unwrap(),
        );
        (plat, HsmGroup::new(hsm))
    }

    #[test]
    fn hart_list_returns_all_ids() {
        let (_, group) = make_group(&[0, 1, 2, 3], false);
        let reply = invoke(&*group, service::GET_HART_LIST, &[0]);
        assert_eq!(reply, [0, 0, 4, 0, 1, 2, 3]);
    }

    #[test]
    fn hart_list_paginates_when_slot_is_small() {
        // 64-byte slot: payload 56 bytes, 3 header words leave 11 entries.
        let ids: Vec<u32> = (0..15).collect();
        let (_, group) = make_group(&ids, false);

        let reply = invoke_slot(&*group, service::GET_HART_LIST, &[0], 64);
        assert_eq!(reply[0], 0);
        assert_eq!(reply[1], 4, "remaining");
        assert_eq!(reply[2], 11, "returned");
        assert_eq!(&reply[3..], (0..11).collect::<Vec<u32>>().as_slice());

        let reply = invoke_slot(&*group, service::GET_HART_LIST, &[11], 64);
        assert_eq!(reply[1], 0);
        assert_eq!(reply[2], 4);
        assert_eq!(&reply[3..], (11..15).collect::<Vec<u32>>().as_slice());

        // Start index past the hart count is invalid.
        let reply = invoke_slot(&*group, service::GET_HART_LIST, &[16], 64);
        assert_eq!(reply, [err_word(RpmiError::InvalidParam), 15, 0]);
    }

    #[test]
    fn suspend_types_listing() {
        let (_, group) = make_group(&[0], false);
        let reply = invoke(&*group, service::GET_SUSPEND_TYPES, &[0]);
        assert_eq!(reply, [0, 0, 2, 0, 3]);
    }

    #[test]
    fn suspend_info_for_known_and_unknown_types() {
        let (_, group) = make_group(&[0], false);
        let reply = invoke(&*group, service::GET_SUSPEND_INFO, &[0]);
        assert_eq!(reply, [0, 1, 10, 20, 30, 100]);

        let reply = invoke(&*group, service::GET_SUSPEND_INFO, &[9]);
        assert_eq!(reply, [err_word(RpmiError::InvalidParam), 0, 0, 0, 0, 0]);
    }

    #[test]
    fn hart_stop_then_stop_again_reports_already() {
        let (_, group) = make_group(&[0, 1], true);

        let reply = invoke(&*group, service::HART_STOP, &[0]);
        assert_eq!(reply, [0]);

        // The event tick reconciles the stop before the second request.
        group.process_events().unwrap();
        assert_eq!(group.hsm().get_hart_state(0), Ok(HartState::Stopped));

        let reply = invoke(&*group, service::HART_STOP, &[0]);
        assert_eq!(reply, [err_word(RpmiError::Already)]);
    }

    #[test]
    fn hart_status_and_start_validation() {
        let (_, group) = make_group(&[4, 5], false);
        let reply = invoke(&*group, service::GET_HART_STATUS, &[4]);
        assert_eq!(reply, [0, HartState::Started as u32]);

        let reply = invoke(&*group, service::GET_HART_STATUS, &[6]);
        assert_eq!(reply, [err_word(RpmiError::InvalidParam), 0]);

        // Starting a started hart is ALREADY.
        let reply = invoke(&*group, service::HART_START, &[4, 0x1000, 0]);
        assert_eq!(reply, [err_word(RpmiError::Already)]);
    }

    #[test]
    fn hart_suspend_unknown_type_is_invalid() {
        let (_, group) = make_group(&[0], false);
        let reply = invoke(&*group, service::HART_SUSPEND, &[0, 7, 0, 0]);
        assert_eq!(reply, [err_word(RpmiError::InvalidParam)]);
    }
}
