//! # RPMI Service Groups
//!
//! Concrete service groups served by an RPMI context:
//!
//! - [`sysreset`]: system shutdown and reboot
//! - [`syssusp`]: whole-system suspend orchestration over the HSM
//! - [`hsm`]: hart lifecycle services wrapping the `rpmi-hsm` engine
//! - [`sysmsi`]: system MSI records and P2A doorbell injection
//! - [`clock`]: hierarchical clock tree with rate propagation
//! - [`cppc`]: CPPC performance hints with per-hart fast channels
//! - [`devpower`]: device power domains
//! - [`voltage`]: voltage domains
//! - [`performance`]: performance domains
//! - [`mm`]: the management-mode (UEFI MM) tunnel
//!
//! Every group implements [`rpmi_core::ServiceGroup`] and is added to a
//! context with [`rpmi_core::Context::add_group`]. Constructors take the
//! platform data and an ops object; mutable state lives behind the
//! group's own lock.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod clock;
pub mod cppc;
pub mod devpower;
pub mod hsm;
pub mod mm;
pub mod performance;
pub mod sysmsi;
pub mod sysreset;
pub mod syssusp;
pub mod voltage;

/// Maximum length of the fixed-width name fields carried by attribute
/// replies (clock, voltage, power and performance domains, system MSIs),
/// including the NUL terminator.
pub const NAME_MAX_LEN: usize = 16;

#[cfg(test)]
mod context_tests {
    //! End-to-end request flow: messages enqueued on the A2P request
    //! ring, dispatched by a context into real service groups, replies
    //! read back from the P2A ack ring.

    use alloc::string::ToString;
    use alloc::sync::Arc;
    use alloc::vec;
    use alloc::vec::Vec;

    use spin::Mutex;

    use rpmi_core::message::{Message, MessageHeader, FLAGS_DOORBELL};
    use rpmi_core::{
        Context, ContextConfig, MessageType, PrivilegeLevel, QueueType, RpmiError, Shmem,
        ShmemTransport, ShmemTransportConfig, Transport,
    };
    use rpmi_hsm::{HartHwState, HartState, Hsm, HsmPlatform};

    use crate::hsm::{service as hsm_service, HsmGroup};
    use crate::sysmsi::{service as msi_service, SysMsiGroup, SysMsiPlatform, MSI_STATE_ENABLE};

    struct FollowingHarts {
        hw: Mutex<Vec<HartHwState>>,
    }

    impl HsmPlatform for FollowingHarts {
        fn hart_get_hw_state(&self, hart_index: u32) -> HartHwState {
            self.hw.lock()[hart_index as usize]
        }

        fn hart_stop_prepare(&self, hart_index: u32) -> rpmi_core::Result<()> {
            self.hw.lock()[hart_index as usize] = HartHwState::Stopped;
            Ok(())
        }

        fn hart_start_prepare(
            &self,
            hart_index: u32,
            _start_addr: u64,
        ) -> rpmi_core::Result<()> {
            self.hw.lock()[hart_index as usize] = HartHwState::Started;
            Ok(())
        }
    }

    struct RecordingMsi {
        writes: Mutex<Vec<(u64, u32)>>,
    }

    impl SysMsiPlatform for RecordingMsi {
        fn validate_msi_addr(&self, _msi_addr: u64) -> bool {
            true
        }

        fn write_msi(&self, addr: u64, data: u32) {
            self.writes.lock().push((addr, data));
        }
    }

    fn make_context() -> (Arc<ShmemTransport>, Context) {
        let shmem = Arc::new(Shmem::heap("e2e", 8192).unwrap());
        let transport = Arc::new(
            ShmemTransport::new(
                ShmemTransportConfig {
                    name: "e2e".to_string(),
                    slot_size: 64,
                    a2p_req_queue_size: 4096,
                    p2a_req_queue_size: 0,
                    big_endian: false,
                },
                shmem,
            )
            .unwrap(),
        );
        let cntx = Context::new(
            ContextConfig {
                name: "e2e".to_string(),
                max_num_groups: 8,
                privilege_level: PrivilegeLevel::M,
                plat_info: "e2e-platform".to_string(),
            },
            transport.clone(),
        )
        .unwrap();
        (transport, cntx)
    }

    fn send(
        transport: &ShmemTransport,
        group_id: u16,
        service_id: u8,
        flags_extra: u8,
        payload: &[u32],
        token: u16,
    ) {
        let mut req = Message::new(64);
        req.header =
            MessageHeader::request(group_id, service_id, MessageType::NormalRequest, token);
        req.header.flags |= flags_extra;
        let mut bytes = Vec::new();
        for word in payload {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        req.set_payload(&bytes).unwrap();
        transport.enqueue(QueueType::A2pRequest, &req).unwrap();
    }

    fn recv_words(transport: &ShmemTransport) -> Vec<u32> {
        let mut ack = Message::new(64);
        transport.dequeue(QueueType::P2aAck, &mut ack).unwrap();
        ack.payload()
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn hart_stop_twice_over_the_wire() {
        let (transport, cntx) = make_context();
        let plat = Arc::new(FollowingHarts {
            hw: Mutex::new(vec![HartHwState::Started; 4]),
        });
        let hsm = Arc::new(Hsm::leaf(vec![0, 1, 2, 3], Vec::new(), plat).unwrap());
        let group = HsmGroup::new(hsm.clone());
        cntx.add_group(group).unwrap();

        send(
            &transport,
            rpmi_core::group_id::HSM,
            hsm_service::HART_STOP,
            0,
            &[0],
            1,
        );
        cntx.process_a2p_request();
        assert_eq!(recv_words(&transport), [0]);

        // Reconciliation between the requests moves the hart to STOPPED.
        cntx.process_all_events();
        assert_eq!(hsm.get_hart_state(0), Ok(HartState::Stopped));

        send(
            &transport,
            rpmi_core::group_id::HSM,
            hsm_service::HART_STOP,
            0,
            &[0],
            2,
        );
        cntx.process_a2p_request();
        assert_eq!(recv_words(&transport), [RpmiError::Already.code() as u32]);
    }

    #[test]
    fn hart_list_over_the_wire() {
        let (transport, cntx) = make_context();
        let plat = Arc::new(FollowingHarts {
            hw: Mutex::new(vec![HartHwState::Started; 4]),
        });
        let hsm = Arc::new(Hsm::leaf(vec![0, 1, 2, 3], Vec::new(), plat).unwrap());
        cntx.add_group(HsmGroup::new(hsm)).unwrap();

        send(
            &transport,
            rpmi_core::group_id::HSM,
            hsm_service::GET_HART_LIST,
            0,
            &[0],
            3,
        );
        cntx.process_a2p_request();
        assert_eq!(recv_words(&transport), [0, 0, 4, 0, 1, 2, 3]);
    }

    #[test]
    fn hsm_group_denied_to_s_mode_context() {
        let shmem = Arc::new(Shmem::heap("smode", 8192).unwrap());
        let transport = Arc::new(
            ShmemTransport::new(
                ShmemTransportConfig {
                    name: "smode".to_string(),
                    slot_size: 64,
                    a2p_req_queue_size: 4096,
                    p2a_req_queue_size: 0,
                    big_endian: false,
                },
                shmem,
            )
            .unwrap(),
        );
        let cntx = Context::new(
            ContextConfig {
                name: "smode".to_string(),
                max_num_groups: 4,
                privilege_level: PrivilegeLevel::S,
                plat_info: "".to_string(),
            },
            transport,
        )
        .unwrap();

        let plat = Arc::new(FollowingHarts {
            hw: Mutex::new(vec![HartHwState::Started]),
        });
        let hsm = Arc::new(Hsm::leaf(vec![0], Vec::new(), plat).unwrap());
        assert_eq!(
            cntx.add_group(HsmGroup::new(hsm)),
            Err(RpmiError::Denied)
        );
    }

    #[test]
    fn doorbell_rings_the_msi_group() {
        let (transport, cntx) = make_context();
        let plat = Arc::new(RecordingMsi {
            writes: Mutex::new(Vec::new()),
        });
        let msi = SysMsiGroup::new(2, 1, plat.clone()).unwrap();
        cntx.add_group(msi).unwrap();

        // Arm the doorbell source through the wire.
        send(
            &transport,
            rpmi_core::group_id::SYSTEM_MSI,
            msi_service::SET_MSI_TARGET,
            0,
            &[1, 0x4000, 0, 0x1234],
            1,
        );
        send(
            &transport,
            rpmi_core::group_id::SYSTEM_MSI,
            msi_service::SET_MSI_STATE,
            0,
            &[1, MSI_STATE_ENABLE],
            2,
        );
        cntx.process_a2p_request();
        assert_eq!(recv_words(&transport), [0]);
        assert_eq!(recv_words(&transport), [0]);
        assert!(plat.writes.lock().is_empty());

        // A doorbell-flagged request rings the P2A MSI after the ack.
        send(
            &transport,
            rpmi_core::group_id::BASE,
            0x04, // Base GET_SPEC_VERSION
            FLAGS_DOORBELL,
            &[],
            3,
        );
        cntx.process_a2p_request();
        assert_eq!(recv_words(&transport), [0, 1 << 16]);
        assert_eq!(plat.writes.lock().as_slice(), [(0x4000, 0x1234)]);

        // Removing the MSI group silences the doorbell.
        let msi = cntx.find_group(rpmi_core::group_id::SYSTEM_MSI).unwrap();
        cntx.remove_group(&msi);
        send(
            &transport,
            rpmi_core::group_id::BASE,
            0x04,
            FLAGS_DOORBELL,
            &[],
            4,
        );
        cntx.process_a2p_request();
        assert_eq!(recv_words(&transport), [0, 1 << 16]);
        assert_eq!(plat.writes.lock().len(), 1);
    }

    #[test]
    fn suspend_blocked_until_fleet_stopped_over_the_wire() {
        use crate::syssusp::{
            service as susp_service, SysSuspendGroup, SysSuspendPlatform, SystemSuspendType,
        };

        struct NopSuspend;
        impl SysSuspendPlatform for NopSuspend {
            fn suspend_prepare(
                &self,
                _hart_index: u32,
                _t: &SystemSuspendType,
                _resume_addr: u64,
            ) -> rpmi_core::Result<()> {
                Ok(())
            }
            fn suspend_ready(&self, _hart_index: u32) -> bool {
                false
            }
            fn suspend_finalize(
                &self,
                _hart_index: u32,
                _t: &SystemSuspendType,
                _resume_addr: u64,
            ) {
            }
            fn can_resume(&self, _hart_index: u32) -> bool {
                false
            }
            fn resume(
                &self,
                _hart_index: u32,
                _t: &SystemSuspendType,
                _resume_addr: u64,
            ) -> rpmi_core::Result<()> {
                Ok(())
            }
        }

        let (transport, cntx) = make_context();
        let plat = Arc::new(FollowingHarts {
            hw: Mutex::new(vec![HartHwState::Started, HartHwState::Started]),
        });
        let hsm = Arc::new(Hsm::leaf(vec![0, 1], Vec::new(), plat).unwrap());
        cntx.add_group(HsmGroup::new(hsm.clone())).unwrap();
        cntx.add_group(
            SysSuspendGroup::new(
                hsm,
                vec![SystemSuspendType { value: 0, attr: 0 }],
                Arc::new(NopSuspend),
            )
            .unwrap(),
        )
        .unwrap();

        // Hart 1 still running: suspend is denied.
        send(
            &transport,
            rpmi_core::group_id::SYSTEM_SUSPEND,
            susp_service::SYSTEM_SUSPEND,
            0,
            &[0, 0, 0, 0],
            1,
        );
        cntx.process_a2p_request();
        assert_eq!(recv_words(&transport), [RpmiError::Denied.code() as u32]);

        // Stop hart 1, reconcile, retry: accepted.
        send(
            &transport,
            rpmi_core::group_id::HSM,
            hsm_service::HART_STOP,
            0,
            &[1],
            2,
        );
        cntx.process_a2p_request();
        assert_eq!(recv_words(&transport), [0]);
        cntx.process_all_events();

        send(
            &transport,
            rpmi_core::group_id::SYSTEM_SUSPEND,
            susp_service::SYSTEM_SUSPEND,
            0,
            &[0, 0, 0, 0],
            3,
        );
        cntx.process_a2p_request();
        assert_eq!(recv_words(&transport), [0]);
    }
}

#[cfg(test)]
mod testutil {
    use alloc::vec;
    use alloc::vec::Vec;

    use rpmi_core::message::ResponseWriter;
    use rpmi_core::{ServiceCall, ServiceGroup};

    /// Run one request against a group with a 64-byte slot and return the
    /// reply payload as little-endian words.
    pub fn invoke(group: &dyn ServiceGroup, service_id: u8, payload: &[u32]) -> Vec<u32> {
        invoke_slot(group, service_id, payload, 64)
    }

    /// Like [`invoke`] with an explicit slot size.
    pub fn invoke_slot(
        group: &dyn ServiceGroup,
        service_id: u8,
        payload: &[u32],
        slot_size: usize,
    ) -> Vec<u32> {
        let mut data = Vec::with_capacity(payload.len() * 4);
        for word in payload {
            data.extend_from_slice(&word.to_le_bytes());
        }
        let call = ServiceCall {
            service_id,
            data: &data,
            is_be: false,
            slot_size,
        };
        let mut buf = vec![0u8; slot_size - 8];
        let mut rsp = ResponseWriter::new(&mut buf, false);
        group
            .handle_request(&call, &mut rsp)
            .expect("handler failed");
        let len = rsp.len();
        buf[..len]
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Reply word carrying an error status.
    pub fn err_word(err: rpmi_core::RpmiError) -> u32 {
        err.code() as u32
    }
}
