//! Error taxonomy surfaced by the control surface and the buffer registry.

use std::fmt;

/// Raw result code returned by a native driver call.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResultCode(pub i32);

impl ResultCode {
    /// Plain success.
    pub const OK: ResultCode = ResultCode(0);
    /// Success for calls that distinguish "supported and done" from plain `OK`.
    pub const SUCCESS: ResultCode = ResultCode(0x3f48_47a0);
    /// Hardware input or output is not present or available.
    pub const NOT_PRESENT: ResultCode = ResultCode(-1000);
    /// Hardware is malfunctioning.
    pub const HW_MALFUNCTION: ResultCode = ResultCode(-999);
    /// An input parameter was invalid.
    pub const INVALID_PARAMETER: ResultCode = ResultCode(-998);
    /// The call is not valid in the driver's current mode.
    pub const INVALID_MODE: ResultCode = ResultCode(-997);
    /// The hardware is not advancing its sample position.
    pub const SP_NOT_ADVANCING: ResultCode = ResultCode(-996);
    /// The sample clock is unknown because no clock is present.
    pub const NO_CLOCK: ResultCode = ResultCode(-995);
    /// Not enough memory to complete the request.
    pub const NO_MEMORY: ResultCode = ResultCode(-994);
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::OK => "ASE_OK",
            Self::SUCCESS => "ASE_SUCCESS",
            Self::NOT_PRESENT => "ASE_NotPresent",
            Self::HW_MALFUNCTION => "ASE_HWMalfunction",
            Self::INVALID_PARAMETER => "ASE_InvalidParameter",
            Self::INVALID_MODE => "ASE_InvalidMode",
            Self::SP_NOT_ADVANCING => "ASE_SPNotAdvancing",
            Self::NO_CLOCK => "ASE_NoClock",
            Self::NO_MEMORY => "ASE_NoMemory",
            _ => return write!(f, "driver code {}", self.0),
        };
        f.write_str(name)
    }
}

/// Typed failure returned by every fallible operation of this crate.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No input or output is present for the requested operation.
    #[error("no input/output present for the requested operation")]
    DeviceUnavailable,
    /// The sample rate is unknown because no clock is present.
    #[error("sample rate unknown, no clock present")]
    ClockUnavailable,
    /// The operation is invalid in the current state.
    #[error("operation invalid in current state: {0}")]
    InvalidMode(&'static str),
    /// Buffer allocation failed for lack of memory.
    #[error("insufficient memory for buffer allocation")]
    InsufficientMemory,
    /// The requested frame count was rejected by the driver.
    #[error("buffer size of {0} frames rejected by driver")]
    UnsupportedBufferSize(i32),
    /// A channel's sample format is not one of the recognized encodings.
    #[error("unsupported sample format (native code {0})")]
    UnsupportedFormat(i32),
    /// The driver reports a hardware malfunction.
    #[error("driver reports hardware malfunction")]
    HardwareFault,
    /// A configuration (or session) is already live.
    #[error("a configuration is already live")]
    AlreadyConfigured,
    /// The managed runtime can neither expose foreign memory nor use copy buffers.
    #[error("managed runtime cannot access driver buffers")]
    UnsupportedPlatform,
    /// Any driver result code not otherwise enumerated.
    #[error("unknown driver error ({0})")]
    UnknownDriverError(ResultCode),
    /// An argument was rejected before reaching the driver.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Map a non-success driver result code onto the taxonomy.
    pub fn from_code(code: ResultCode) -> Self {
        match code {
            ResultCode::NOT_PRESENT => Error::DeviceUnavailable,
            ResultCode::NO_CLOCK => Error::ClockUnavailable,
            ResultCode::INVALID_MODE => {
                Error::InvalidMode("driver rejected the call in its current mode")
            }
            ResultCode::NO_MEMORY => Error::InsufficientMemory,
            ResultCode::HW_MALFUNCTION => Error::HardwareFault,
            other => Error::UnknownDriverError(other),
        }
    }

    /// Map a buffer creation failure. Drivers reject frame counts with
    /// `INVALID_MODE` or `INVALID_PARAMETER`.
    pub fn from_create_buffers(code: ResultCode, frames: i32) -> Self {
        match code {
            ResultCode::INVALID_MODE | ResultCode::INVALID_PARAMETER => {
                Error::UnsupportedBufferSize(frames)
            }
            other => Error::from_code(other),
        }
    }
}

impl From<ResultCode> for Error {
    fn from(code: ResultCode) -> Self {
        Error::from_code(code)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
