//! # RPMI Status Codes
//!
//! Every layer of the library reports failures with the protocol's
//! negative status codes. Success is the wire value `0`; it is represented
//! in Rust by `Ok(..)` so handler code propagates failures with `?` and
//! converts to the wire form only when framing a reply.

/// Library-wide result type.
pub type Result<T> = core::result::Result<T, RpmiError>;

/// Wire value of a successful operation.
pub const STATUS_SUCCESS: i32 = 0;

/// RPMI error codes.
///
/// The discriminants are the on-wire status values. Codes `-15..=-127`
/// are reserved by the specification and `-128` onwards are vendor
/// defined; neither range is modelled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RpmiError {
    /// General failure.
    Failed = -1,
    /// Service or feature not supported.
    NotSupported = -2,
    /// Invalid parameter.
    InvalidParam = -3,
    /// Denied due to insufficient permission or an unmet prerequisite.
    Denied = -4,
    /// Invalid address or offset.
    InvalidAddr = -5,
    /// Operation already in progress or state already reached.
    Already = -6,
    /// Implementation violates the specification version.
    Extension = -7,
    /// Operation failed due to a hardware fault.
    HwFault = -8,
    /// System, device or resource is busy.
    Busy = -9,
    /// System, device or resource is in an invalid state.
    InvalidState = -10,
    /// Index, offset or address is out of range.
    BadRange = -11,
    /// Operation timed out.
    Timeout = -12,
    /// I/O error, including full/empty transport queues.
    Io = -13,
    /// No data available.
    NoData = -14,
}

impl RpmiError {
    /// Wire status value of this error.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Decode a wire status value; `0` and unknown codes return `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::Failed,
            -2 => Self::NotSupported,
            -3 => Self::InvalidParam,
            -4 => Self::Denied,
            -5 => Self::InvalidAddr,
            -6 => Self::Already,
            -7 => Self::Extension,
            -8 => Self::HwFault,
            -9 => Self::Busy,
            -10 => Self::InvalidState,
            -11 => Self::BadRange,
            -12 => Self::Timeout,
            -13 => Self::Io,
            -14 => Self::NoData,
            _ => return None,
        })
    }
}

/// Wire status word for a result: `0` on success, the error code otherwise.
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => STATUS_SUCCESS,
        Err(e) => e.code(),
    }
}
