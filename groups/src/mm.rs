//! # Management Mode Service Group
//!
//! A generic tunnel into UEFI management mode. The request only carries
//! two offsets into the MM shared memory; the actual communication
//! buffer lives there, headed by a 16-byte GUID selecting the registered
//! handler:
//!
//! ```text
//! struct mm_comm_header { byte guid[16]; u64 msg_len; byte data[msg_len]; }
//! ```
//!
//! Handlers are registered in batches; a batch is rejected wholesale if
//! it carries a duplicate GUID, either within itself or against an
//! earlier registration. Dropping the group shuts every handler down.
//!
//! Admitted only to M-mode contexts.

use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;
use spin::Mutex;

use rpmi_core::error::STATUS_SUCCESS;
use rpmi_core::message::ResponseWriter;
use rpmi_core::{
    group_id, GroupInfo, PrivilegeFlags, Result, RpmiError, ServiceCall, ServiceGroup,
    ServiceSpec, Shmem,
};

/// Management mode service IDs.
pub mod service {
    /// Enable event notifications (not supported).
    pub const ENABLE_NOTIFICATION: u8 = 0x01;
    /// MM version and tunnel shared-memory window.
    pub const GET_ATTRIBUTES: u8 = 0x02;
    /// Run one MM communication exchange.
    pub const COMMUNICATE: u8 = 0x03;
}

/// Length of an EFI GUID in bytes.
pub const GUID_LEN: usize = 16;

/// Byte offset of the message length in the MM communication header.
pub const MM_COMM_MSG_LEN_OFFSET: usize = GUID_LEN;
/// Byte offset of the payload in the MM communication header.
pub const MM_COMM_DATA_OFFSET: usize = GUID_LEN + 8;

/// Management-mode interface version implemented by this group.
pub const MM_VERSION: u32 = rpmi_core::version(1, 0);

/// An EFI GUID in wire byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; GUID_LEN]);

impl Guid {
    /// Build a GUID from the EFI `(data1, data2, data3, data4)` fields.
    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        let d1 = data1.to_le_bytes();
        let d2 = data2.to_le_bytes();
        let d3 = data3.to_le_bytes();
        Self([
            d1[0], d1[1], d1[2], d1[3], d2[0], d2[1], d3[0], d3[1], data4[0], data4[1],
            data4[2], data4[3], data4[4], data4[5], data4[6], data4[7],
        ])
    }
}

/// One exchange through the MM tunnel, as seen by a registered handler.
#[derive(Debug, Clone, Copy)]
pub struct MmRequest {
    /// Offset of the inbound communication buffer in the MM window.
    pub idata_off: usize,
    /// Offset the reply buffer must be written to.
    pub odata_off: usize,
}

/// A handler behind one GUID of the MM tunnel.
pub trait MmHandler: Send + Sync {
    /// Serve one exchange; reads and writes variable-length payloads
    /// through `shmem` and returns the response data length.
    fn communicate(&self, shmem: &Shmem, request: &MmRequest) -> Result<u32>;

    /// Invoked when the MM group is torn down.
    fn shutdown(&self, _shmem: &Shmem) {}
}

/// The management mode service group.
pub struct MmGroup {
    shmem: Arc<Shmem>,
    handlers: Mutex<HashMap<Guid, Arc<dyn MmHandler>>>,
}

static SERVICES: &[ServiceSpec] = &[
    ServiceSpec::absent(), // 0: unused
    ServiceSpec::absent(), // ENABLE_NOTIFICATION
    ServiceSpec::new(0),   // GET_ATTRIBUTES
    ServiceSpec::new(8),   // COMMUNICATE
];

static INFO: GroupInfo = GroupInfo {
    name: "mm",
    group_id: group_id::MANAGEMENT_MODE,
    version: rpmi_core::SPEC_VERSION,
    privilege: PrivilegeFlags::M_MODE,
    services: SERVICES,
};

impl MmGroup {
    /// Create a management mode group over the tunnel window.
    pub fn new(shmem: Arc<Shmem>) -> Arc<Self> {
        Arc::new(Self {
            shmem,
            handlers: Mutex::new(HashMap::new()),
        })
    }

    /// The tunnel shared-memory window.
    pub fn shmem(&self) -> &Arc<Shmem> {
        &self.shmem
    }

    /// Register a batch of per-GUID handlers.
    ///
    /// The whole batch is rejected when it contains a duplicate GUID or
    /// collides with an already registered one.
    pub fn register(&self, entries: Vec<(Guid, Arc<dyn MmHandler>)>) -> Result<()> {
        if entries.is_empty() {
            return Err(RpmiError::InvalidParam);
        }

        let mut handlers = self.handlers.lock();
        for (i, (guid, _)) in entries.iter().enumerate() {
            if handlers.contains_key(guid) || entries[..i].iter().any(|(g, _)| g == guid) {
                log::warn!("mm: duplicate GUID in handler registration");
                return Err(RpmiError::InvalidParam);
            }
        }
        for (guid, handler) in entries {
            handlers.insert(guid, handler);
        }
        Ok(())
    }

    /// Number of registered handlers.
    pub fn num_handlers(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl ServiceGroup for MmGroup {
    fn info(&self) -> &GroupInfo {
        &INFO
    }

    fn handle_request(&self, call: &ServiceCall<'_>, rsp: &mut ResponseWriter<'_>) -> Result<()> {
        let req = call.reader();
        match call.service_id {
            service::GET_ATTRIBUTES => {
                rsp.put_i32(STATUS_SUCCESS);
                rsp.put_u32(MM_VERSION);
                rsp.put_u64(self.shmem.base());
                rsp.put_u32(self.shmem.size() as u32);
            }
            service::COMMUNICATE => {
                let request = MmRequest {
                    idata_off: req.u32(0) as usize,
                    odata_off: req.u32(1) as usize,
                };

                let mut guid = Guid([0; GUID_LEN]);
                self.shmem.read(request.idata_off, &mut guid.0)?;

                let handler = self.handlers.lock().get(&guid).cloned();
                let Some(handler) = handler else {
                    log::debug!("mm: no handler registered for communication GUID");
                    return Err(RpmiError::NoData);
                };

                let result = handler.communicate(&self.shmem, &request);
                rsp.put_i32(rpmi_core::error::status_code(&result));
                rsp.put_u32(result.unwrap_or(0));
            }
            _ => rsp.put_i32(RpmiError::NotSupported.code()),
        }
        Ok(())
    }
}

impl Drop for MmGroup {
    fn drop(&mut self) {
        for handler in self.handlers.lock().values() {
            handler.shutdown(&self.shmem);
        }
    }
}
