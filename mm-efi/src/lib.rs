//! # Management-Mode EFI Plug-in
//!
//! Registers the UEFI management-mode protocol GUIDs into an
//! [`MmGroup`]: the variable-service protocol, the variable policy
//! protocol, and the three boot-event signals (end-of-DXE,
//! ready-to-boot, exit-boot-services).
//!
//! The variable-service handler parses the communication buffer carried
//! in the MM window:
//!
//! ```text
//! mm_comm_header   { guid[16]; msg_len: u64; data[msg_len] }
//! efi_var_header   { function: u64; return_status: u64; data[] }
//! ```
//!
//! validates the function payload (size bounds, overflow, NUL-terminated
//! variable names) and forwards GET_VARIABLE, GET_NEXT_VARIABLE_NAME and
//! SET_VARIABLE to an [`EfiVarPlatform`]. GET_PAYLOAD_SIZE is answered
//! internally; boot events acknowledge with `EFI_SUCCESS`.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use rpmi_core::{Result, RpmiError, Shmem};
use rpmi_groups::mm::{
    Guid, MmGroup, MmHandler, MmRequest, MM_COMM_DATA_OFFSET, MM_COMM_MSG_LEN_OFFSET,
};

/// EFI variable-service protocol GUID.
pub const VAR_PROTOCOL_GUID: Guid = Guid::from_fields(
    0xed32d533,
    0x99e6,
    0x4209,
    [0x9c, 0xc0, 0x2d, 0x72, 0xcd, 0xd9, 0x98, 0xa7],
);

/// EFI variable-policy protocol GUID.
pub const VAR_POLICY_GUID: Guid = Guid::from_fields(
    0xda1b0d11,
    0xd1a7,
    0x46c4,
    [0x9d, 0xc9, 0xf3, 0x71, 0x48, 0x75, 0xc6, 0xeb],
);

/// End-of-DXE event GUID.
pub const END_OF_DXE_GUID: Guid = Guid::from_fields(
    0x02ce967a,
    0xdd7e,
    0x4ffc,
    [0x9e, 0xe7, 0x81, 0x0c, 0xf0, 0x47, 0x08, 0x80],
);

/// Ready-to-boot event GUID.
pub const READY_TO_BOOT_GUID: Guid = Guid::from_fields(
    0x7ce88fb3,
    0x4bd7,
    0x4679,
    [0x87, 0xa8, 0xa8, 0xd8, 0xde, 0xe5, 0x0d, 0x2b],
);

/// Exit-boot-services event GUID.
pub const EXIT_BOOT_SVC_GUID: Guid = Guid::from_fields(
    0x27abf055,
    0xb1b8,
    0x4c26,
    [0x80, 0x48, 0x74, 0x8f, 0x37, 0xba, 0xa2, 0xdf],
);

const MAX_BIT: u64 = 1 << 63;

const fn encode_error(code: u64) -> u64 {
    MAX_BIT | code
}

/// EFI success status.
pub const EFI_SUCCESS: u64 = 0;
/// EFI invalid-parameter status.
pub const EFI_INVALID_PARAMETER: u64 = encode_error(2);
/// EFI unsupported status.
pub const EFI_UNSUPPORTED: u64 = encode_error(3);
/// EFI buffer-too-small status.
pub const EFI_BUFFER_TOO_SMALL: u64 = encode_error(5);
/// EFI out-of-resources status.
pub const EFI_OUT_OF_RESOURCES: u64 = encode_error(9);
/// EFI not-found status.
pub const EFI_NOT_FOUND: u64 = encode_error(14);
/// EFI access-denied status.
pub const EFI_ACCESS_DENIED: u64 = encode_error(15);

/// EFI variable-service function codes.
pub mod var_fn {
    /// Read a variable.
    pub const GET_VARIABLE: u64 = 1;
    /// Enumerate variable names.
    pub const GET_NEXT_VARIABLE_NAME: u64 = 2;
    /// Write a variable.
    pub const SET_VARIABLE: u64 = 3;
    /// Query variable-store information.
    pub const QUERY_VARIABLE_INFO: u64 = 4;
    /// Ready-to-boot signal.
    pub const READY_TO_BOOT: u64 = 5;
    /// Exit-boot-services signal.
    pub const EXIT_BOOT_SERVICE: u64 = 6;
    /// Variable statistics.
    pub const GET_STATISTICS: u64 = 7;
    /// Lock a variable.
    pub const LOCK_VARIABLE: u64 = 8;
    /// Set a variable-check property.
    pub const VAR_CHECK_PROPERTY_SET: u64 = 9;
    /// Get a variable-check property.
    pub const VAR_CHECK_PROPERTY_GET: u64 = 10;
    /// Maximum variable payload size.
    pub const GET_PAYLOAD_SIZE: u64 = 11;
    /// Initialise the runtime variable cache.
    pub const INIT_RUNTIME_CACHE_CONTEXT: u64 = 12;
    /// Synchronise the runtime variable cache.
    pub const SYNC_RUNTIME_CACHE: u64 = 13;
    /// Runtime variable cache information.
    pub const GET_RUNTIME_CACHE_INFO: u64 = 14;
}

/// Size of the EFI variable communication header (function + status).
pub const EFI_VAR_COMM_HEADER_SIZE: usize = 16;

/// Largest variable message, header included.
pub const MAX_VARINFO_SIZE: usize = 1024;

/// Largest variable function payload.
pub const MAX_PAYLOAD_SIZE: usize = MAX_VARINFO_SIZE - EFI_VAR_COMM_HEADER_SIZE;

/// Byte offset of the variable name in an access-variable payload
/// `{ guid[16]; datasize: u64; namesize: u64; attr: u32; name: u16[] }`.
const ACCESS_VAR_NAME_OFFSET: usize = 36;

/// Byte offset of the name in a get-next-variable-name payload
/// `{ guid[16]; namesize: u64; name: u16[] }`.
const NEXT_VAR_NAME_OFFSET: usize = 24;

/// Size of the variable-policy reply header
/// `{ signature: u32; revision: u32; command: u32; result: u64 }`.
const POLICY_HEADER_SIZE: usize = 24;
/// Byte offset of `result` within the policy header.
const POLICY_RESULT_OFFSET: usize = 16;

/// Platform backend of the EFI variable service.
///
/// Each hook receives the function payload (the bytes after the variable
/// communication header) and may rewrite it in place; the buffer is
/// written back through the MM window afterwards. The return value is an
/// EFI status.
pub trait EfiVarPlatform: Send + Sync {
    /// Serve GetVariable.
    fn get_variable(&self, payload: &mut [u8]) -> u64;
    /// Serve GetNextVariableName.
    fn get_next_variable_name(&self, payload: &mut [u8]) -> u64;
    /// Serve SetVariable.
    fn set_variable(&self, payload: &mut [u8]) -> u64;
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(bytes)
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

/// Common checks for GetVariable and SetVariable payloads.
fn validate_access_variable(payload: &[u8], is_get_variable: bool) -> u64 {
    if payload.len() < ACCESS_VAR_NAME_OFFSET {
        log::debug!("mm-efi: access-variable payload too short");
        return EFI_INVALID_PARAMETER;
    }
    let datasize = read_u64(payload, 16);
    let namesize = read_u64(payload, 24);

    let info_size = (ACCESS_VAR_NAME_OFFSET as u64)
        .checked_add(datasize)
        .and_then(|v| v.checked_add(namesize));
    match info_size {
        Some(size) if size <= payload.len() as u64 => {}
        _ => {
            log::debug!("mm-efi: variable info size exceeds the payload");
            return EFI_ACCESS_DENIED;
        }
    }

    // The variable name must be a NUL-terminated UTF-16 string.
    if namesize < 2 || namesize % 2 != 0 {
        return EFI_ACCESS_DENIED;
    }
    let last = ACCESS_VAR_NAME_OFFSET + namesize as usize - 2;
    if read_u16(payload, last) != 0 {
        return EFI_ACCESS_DENIED;
    }

    if is_get_variable && read_u16(payload, ACCESS_VAR_NAME_OFFSET) == 0 {
        return EFI_INVALID_PARAMETER;
    }

    EFI_SUCCESS
}

/// Checks for GetNextVariableName payloads.
fn validate_next_variable_name(payload: &[u8]) -> u64 {
    if payload.len() < NEXT_VAR_NAME_OFFSET {
        log::debug!("mm-efi: get-next-variable payload too short");
        return EFI_INVALID_PARAMETER;
    }
    let namesize = read_u64(payload, 16);

    let info_size = (NEXT_VAR_NAME_OFFSET as u64).checked_add(namesize);
    match info_size {
        Some(size) if size <= payload.len() as u64 => {}
        _ => return EFI_ACCESS_DENIED,
    }

    // A NUL terminator must appear within namesize.
    let max_chars = (namesize / 2) as usize;
    if max_chars == 0 {
        return EFI_INVALID_PARAMETER;
    }
    let terminated = (0..max_chars)
        .any(|i| read_u16(payload, NEXT_VAR_NAME_OFFSET + 2 * i) == 0);
    if !terminated {
        return EFI_INVALID_PARAMETER;
    }

    EFI_SUCCESS
}

/// The variable-service protocol handler.
struct VarProtocolHandler {
    platform: Arc<dyn EfiVarPlatform>,
}

impl VarProtocolHandler {
    /// Dispatch one variable function over the message body.
    fn dispatch(&self, body: &mut [u8]) -> u64 {
        if body.len() < EFI_VAR_COMM_HEADER_SIZE {
            log::debug!("mm-efi: variable message too short for its header");
            return EFI_INVALID_PARAMETER;
        }
        let function = read_u64(body, 0);
        let payload = &mut body[EFI_VAR_COMM_HEADER_SIZE..];
        if payload.len() > MAX_PAYLOAD_SIZE {
            return EFI_INVALID_PARAMETER;
        }

        match function {
            var_fn::GET_VARIABLE => {
                let status = validate_access_variable(payload, true);
                if status != EFI_SUCCESS {
                    return status;
                }
                self.platform.get_variable(payload)
            }
            var_fn::GET_NEXT_VARIABLE_NAME => {
                let status = validate_next_variable_name(payload);
                if status != EFI_SUCCESS {
                    return status;
                }
                self.platform.get_next_variable_name(payload)
            }
            var_fn::SET_VARIABLE => {
                let status = validate_access_variable(payload, false);
                if status != EFI_SUCCESS {
                    return status;
                }
                self.platform.set_variable(payload)
            }
            var_fn::GET_PAYLOAD_SIZE => {
                if payload.len() < 8 {
                    return EFI_INVALID_PARAMETER;
                }
                payload[..8].copy_from_slice(&(MAX_PAYLOAD_SIZE as u64).to_le_bytes());
                EFI_SUCCESS
            }
            var_fn::READY_TO_BOOT | var_fn::EXIT_BOOT_SERVICE => EFI_SUCCESS,
            _ => EFI_UNSUPPORTED,
        }
    }
}

/// Read the full MM communication message at `idata_off`.
fn read_message(shmem: &Shmem, idata_off: usize) -> Result<Vec<u8>> {
    let msg_len = {
        let mut bytes = [0u8; 8];
        shmem.read(idata_off + MM_COMM_MSG_LEN_OFFSET, &mut bytes)?;
        u64::from_le_bytes(bytes) as usize
    };
    if msg_len > MAX_VARINFO_SIZE {
        return Err(RpmiError::NoData);
    }
    let mut message = vec![0u8; MM_COMM_DATA_OFFSET + msg_len];
    shmem.read(idata_off, &mut message)?;
    Ok(message)
}

impl MmHandler for VarProtocolHandler {
    fn communicate(&self, shmem: &Shmem, request: &MmRequest) -> Result<u32> {
        let mut message = read_message(shmem, request.idata_off)?;

        let status = self.dispatch(&mut message[MM_COMM_DATA_OFFSET..]);
        if message.len() >= MM_COMM_DATA_OFFSET + EFI_VAR_COMM_HEADER_SIZE {
            let status_off = MM_COMM_DATA_OFFSET + 8;
            message[status_off..status_off + 8].copy_from_slice(&status.to_le_bytes());
        }

        shmem.write(request.odata_off, &message)?;
        Ok(message.len() as u32)
    }
}

/// The variable-policy protocol handler: acknowledges every command.
struct VarPolicyHandler;

impl MmHandler for VarPolicyHandler {
    fn communicate(&self, shmem: &Shmem, request: &MmRequest) -> Result<u32> {
        let mut message = read_message(shmem, request.idata_off)?;
        let needed = MM_COMM_DATA_OFFSET + POLICY_HEADER_SIZE;
        if message.len() < needed {
            message.resize(needed, 0);
        }

        let result_off = MM_COMM_DATA_OFFSET + POLICY_RESULT_OFFSET;
        message[result_off..result_off + 8].copy_from_slice(&0u64.to_le_bytes());

        // Reply length is padded to the next 16-byte boundary.
        let reply_len = needed.next_multiple_of(16);
        message.resize(reply_len, 0);

        shmem.write(request.odata_off, &message)?;
        Ok(reply_len as u32)
    }
}

/// Handler for the boot-event GUIDs; the notification itself is the
/// payload.
struct BootEventHandler;

impl MmHandler for BootEventHandler {
    fn communicate(&self, _shmem: &Shmem, _request: &MmRequest) -> Result<u32> {
        Ok(0)
    }
}

/// Register the EFI service handlers into a management-mode group.
pub fn register_efi_services(group: &MmGroup, platform: Arc<dyn EfiVarPlatform>) -> Result<()> {
    group.register(vec![
        (
            VAR_PROTOCOL_GUID,
            Arc::new(VarProtocolHandler { platform }) as Arc<dyn MmHandler>,
        ),
        (VAR_POLICY_GUID, Arc::new(VarPolicyHandler)),
        (END_OF_DXE_GUID, Arc::new(BootEventHandler)),
        (READY_TO_BOOT_GUID, Arc::new(BootEventHandler)),
        (EXIT_BOOT_SVC_GUID, Arc::new(BootEventHandler)),
    ])
}


#[cfg(test)]
mod tests {
    use super::*;
    use rpmi_core::message::ResponseWriter;
    use rpmi_core::{ServiceCall, ServiceGroup};
    use rpmi_groups::mm::service;
    use spin::Mutex;

    struct FakeVarStore {
        gets: Mutex<u32>,
        sets: Mutex<u32>,
    }

    impl FakeVarStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gets: Mutex::new(0),
                sets: Mutex::new(0),
            })
        }
    }

    impl EfiVarPlatform for FakeVarStore {
        fn get_variable(&self, payload: &mut [u8]) -> u64 {
            *self.gets.lock() += 1;
            // Report the stored data as one byte of 0x5A after the name.
            let name_end = ACCESS_VAR_NAME_OFFSET + read_u64(payload, 24) as usize;
            if name_end < payload.len() {
                payload[name_end] = 0x5A;
            }
            EFI_SUCCESS
        }

        fn get_next_variable_name(&self, _payload: &mut [u8]) -> u64 {
            EFI_NOT_FOUND
        }

        fn set_variable(&self, _payload: &mut [u8]) -> u64 {
            *self.sets.lock() += 1;
            EFI_SUCCESS
        }
    }

    const IDATA_OFF: usize = 0;
    const ODATA_OFF: usize = 2048;

    fn make_group() -> (Arc<FakeVarStore>, Arc<MmGroup>) {
        let shmem = Arc::new(Shmem::heap("mm-efi", 4096).unwrap());
        let group = MmGroup::new(shmem);
        let store = FakeVarStore::new();
        register_efi_services(&group, store.clone()).unwrap();
        (store, group)
    }

    /// Stage `{guid, msg_len, function, return_status, payload}` at the
    /// inbound offset of the MM window.
    fn stage(group: &MmGroup, guid: &Guid, function: u64, payload: &[u8]) {
        let shmem = group.shmem();
        let msg_len = (EFI_VAR_COMM_HEADER_SIZE + payload.len()) as u64;
        shmem.write(IDATA_OFF, &guid.0).unwrap();
        shmem
            .write(IDATA_OFF + MM_COMM_MSG_LEN_OFFSET, &msg_len.to_le_bytes())
            .unwrap();
        shmem
            .write(IDATA_OFF + MM_COMM_DATA_OFFSET, &function.to_le_bytes())
            .unwrap();
        shmem
            .write(IDATA_OFF + MM_COMM_DATA_OFFSET + 8, &u64::MAX.to_le_bytes())
            .unwrap();
        shmem
            .write(
                IDATA_OFF + MM_COMM_DATA_OFFSET + EFI_VAR_COMM_HEADER_SIZE,
                payload,
            )
            .unwrap();
    }

    /// Stage a bare message (no variable header) for the non-variable
    /// GUIDs.
    fn stage_raw(group: &MmGroup, guid: &Guid, data: &[u8]) {
        let shmem = group.shmem();
        shmem.write(IDATA_OFF, &guid.0).unwrap();
        shmem
            .write(
                IDATA_OFF + MM_COMM_MSG_LEN_OFFSET,
                &(data.len() as u64).to_le_bytes(),
            )
            .unwrap();
        shmem.write(IDATA_OFF + MM_COMM_DATA_OFFSET, data).unwrap();
    }

    /// Drive one COMMUNICATE through the MM group and return the
    /// response data length plus the reply message from the window.
    fn communicate(group: &MmGroup) -> (u32, Vec<u8>) {
        let mut request = Vec::new();
        request.extend_from_slice(&(IDATA_OFF as u32).to_le_bytes());
        request.extend_from_slice(&(ODATA_OFF as u32).to_le_bytes());
        let call = ServiceCall {
            service_id: service::COMMUNICATE,
            data: &request,
            is_be: false,
            slot_size: 64,
        };
        let mut buf = [0u8; 56];
        let mut rsp = ResponseWriter::new(&mut buf, false);
        group.handle_request(&call, &mut rsp).unwrap();
        assert_eq!(rsp.len(), 8);
        let status = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(status, 0);
        let len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let mut reply = vec![0u8; len as usize];
        if len > 0 {
            group.shmem().read(ODATA_OFF, &mut reply).unwrap();
        }
        (len, reply)
    }

    /// EFI status written back into the reply's variable header.
    fn reply_status(reply: &[u8]) -> u64 {
        read_u64(reply, MM_COMM_DATA_OFFSET + 8)
    }

    /// A minimal valid access-variable payload: a two-character name
    /// `[first_char, NUL]` followed by `datasize` data bytes.
    fn access_payload(first_char: u16, datasize: u64) -> Vec<u8> {
        let namesize = 4u64;
        let mut payload =
            vec![0u8; ACCESS_VAR_NAME_OFFSET + namesize as usize + datasize as usize];
        payload[16..24].copy_from_slice(&datasize.to_le_bytes());
        payload[24..32].copy_from_slice(&namesize.to_le_bytes());
        payload[ACCESS_VAR_NAME_OFFSET..ACCESS_VAR_NAME_OFFSET + 2]
            .copy_from_slice(&first_char.to_le_bytes());
        payload
    }

    #[test]
    fn get_variable_round_trip() {
        let (store, group) = make_group();
        stage(
            &group,
            &VAR_PROTOCOL_GUID,
            var_fn::GET_VARIABLE,
            &access_payload(b'A' as u16, 1),
        );
        let (_, reply) = communicate(&group);
        assert_eq!(*store.gets.lock(), 1);
        assert_eq!(reply_status(&reply), EFI_SUCCESS);
        // The store wrote its one data byte after the name.
        let data_off =
            MM_COMM_DATA_OFFSET + EFI_VAR_COMM_HEADER_SIZE + ACCESS_VAR_NAME_OFFSET + 4;
        assert_eq!(reply[data_off], 0x5A);
    }

    #[test]
    fn set_variable_reaches_the_store() {
        let (store, group) = make_group();
        stage(
            &group,
            &VAR_PROTOCOL_GUID,
            var_fn::SET_VARIABLE,
            &access_payload(b'B' as u16, 4),
        );
        let (_, reply) = communicate(&group);
        assert_eq!(*store.sets.lock(), 1);
        assert_eq!(reply_status(&reply), EFI_SUCCESS);
    }

    #[test]
    fn get_variable_with_empty_name_is_invalid() {
        let (store, group) = make_group();
        stage(
            &group,
            &VAR_PROTOCOL_GUID,
            var_fn::GET_VARIABLE,
            &access_payload(0, 0),
        );
        let (_, reply) = communicate(&group);
        assert_eq!(*store.gets.lock(), 0);
        assert_eq!(reply_status(&reply), EFI_INVALID_PARAMETER);
    }

    #[test]
    fn unterminated_name_is_denied() {
        let (store, group) = make_group();
        let mut payload = access_payload(b'A' as u16, 0);
        let last = ACCESS_VAR_NAME_OFFSET + 2;
        payload[last..last + 2].copy_from_slice(&(b'B' as u16).to_le_bytes());
        stage(&group, &VAR_PROTOCOL_GUID, var_fn::SET_VARIABLE, &payload);
        let (_, reply) = communicate(&group);
        assert_eq!(*store.sets.lock(), 0);
        assert_eq!(reply_status(&reply), EFI_ACCESS_DENIED);
    }

    #[test]
    fn oversized_declared_data_is_denied() {
        let (_, group) = make_group();
        let mut payload = access_payload(b'A' as u16, 0);
        // A datasize that overflows the info-size computation.
        payload[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        stage(&group, &VAR_PROTOCOL_GUID, var_fn::SET_VARIABLE, &payload);
        let (_, reply) = communicate(&group);
        assert_eq!(reply_status(&reply), EFI_ACCESS_DENIED);
    }

    #[test]
    fn get_next_variable_name_flows_through() {
        let (_, group) = make_group();
        let mut payload = vec![0u8; NEXT_VAR_NAME_OFFSET + 4];
        payload[16..24].copy_from_slice(&4u64.to_le_bytes());
        payload[NEXT_VAR_NAME_OFFSET..NEXT_VAR_NAME_OFFSET + 2]
            .copy_from_slice(&(b'A' as u16).to_le_bytes());
        stage(
            &group,
            &VAR_PROTOCOL_GUID,
            var_fn::GET_NEXT_VARIABLE_NAME,
            &payload,
        );
        let (_, reply) = communicate(&group);
        assert_eq!(reply_status(&reply), EFI_NOT_FOUND);
    }

    #[test]
    fn payload_size_query_answers_inline() {
        let (_, group) = make_group();
        stage(
            &group,
            &VAR_PROTOCOL_GUID,
            var_fn::GET_PAYLOAD_SIZE,
            &[0u8; 8],
        );
        let (_, reply) = communicate(&group);
        assert_eq!(reply_status(&reply), EFI_SUCCESS);
        let off = MM_COMM_DATA_OFFSET + EFI_VAR_COMM_HEADER_SIZE;
        assert_eq!(read_u64(&reply, off), MAX_PAYLOAD_SIZE as u64);
    }

    #[test]
    fn unknown_function_is_unsupported() {
        let (_, group) = make_group();
        stage(&group, &VAR_PROTOCOL_GUID, 0x77, &[]);
        let (_, reply) = communicate(&group);
        assert_eq!(reply_status(&reply), EFI_UNSUPPORTED);
    }

    #[test]
    fn policy_handler_zeroes_result_and_pads() {
        let (_, group) = make_group();
        stage_raw(&group, &VAR_POLICY_GUID, &[0xEE; POLICY_HEADER_SIZE]);
        let (len, reply) = communicate(&group);
        assert_eq!(len as usize % 16, 0);
        let result_off = MM_COMM_DATA_OFFSET + POLICY_RESULT_OFFSET;
        assert_eq!(read_u64(&reply, result_off), 0);
    }

    #[test]
    fn boot_events_acknowledge_without_reply_data() {
        let (_, group) = make_group();
        for guid in [&END_OF_DXE_GUID, &READY_TO_BOOT_GUID, &EXIT_BOOT_SVC_GUID] {
            stage_raw(&group, guid, &[]);
            let (len, _) = communicate(&group);
            assert_eq!(len, 0);
        }
    }

    #[test]
    fn registration_is_complete_and_unique() {
        let (_, group) = make_group();
        assert_eq!(group.num_handlers(), 5);
        // Double registration collides on every GUID.
        assert!(register_efi_services(&group, FakeVarStore::new()).is_err());
    }
}
