//! Library error taxonomy
//!
//! Every failure the library surfaces is an [`NvmError`]. Each variant carries a
//! stable negative return code and a short English description so callers that
//! speak in numeric codes can round-trip through [`NvmError::code`] and
//! [`NvmError::from_code`].

use thiserror::Error;

/// Return code for success.
pub const NVM_SUCCESS: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum NvmError {
    #[error("An unknown error occurred.")]
    Unknown,
    #[error("There is not enough memory to complete the requested operation.")]
    NoMemory,
    #[error("This operation is not supported.")]
    NotSupported,
    #[error("One or more input parameters were incorrect.")]
    InvalidParameter,
    #[error("The device is not manageable by the management software.")]
    NotManageable,
    #[error("Invalid permissions. This operation requires administrative rights.")]
    InvalidPermissions,
    #[error("The return code was not valid.")]
    BadErrorCode,
    #[error("There was an error in the data transfer.")]
    DataTransferError,
    #[error("There was an internal error in the device.")]
    DeviceError,
    #[error("The device is currently busy processing a long operation command.")]
    DeviceBusy,
    #[error("The passphrase is not valid.")]
    BadPassphrase,
    #[error("The new passphrase does not meet the minimum requirements.")]
    InvalidPassphrase,
    #[error("No changes can be made to the security state of the device until the next reboot.")]
    SecurityFrozen,
    #[error("The maximum passphrase submission limit has been reached.")]
    LimitPassphrase,
    #[error("Data at rest security is not enabled.")]
    SecurityDisabled,
    #[error("The device identifier is not valid.")]
    BadDevice,
    #[error("The array is too small.")]
    ArrayTooSmall,
    #[error("The callback identifier is not valid.")]
    BadCallback,
    #[error("The file is not valid.")]
    BadFile,
    #[error("The pool identifier is not valid.")]
    BadPool,
    #[error("The namespace identifier is not valid.")]
    BadNamespace,
    #[error("The firmware image is not valid for the device.")]
    BadFirmware,
    #[error("The device driver failed the requested operation.")]
    DriverFailed,
    #[error("The security state of the device is not valid for this operation.")]
    BadSecurityState,
    #[error("The requested item could not be found.")]
    NotFound,
    #[error("The maximum number of event subscribers has been reached.")]
    ExceedsMaxSubscribers,
    #[error("The cached data is not available.")]
    NotCached,
    #[error("The underlying software is missing or incompatible with this version.")]
    BadDriver,
}

const ALL_ERRORS: [NvmError; 28] = [
    NvmError::Unknown,
    NvmError::NoMemory,
    NvmError::NotSupported,
    NvmError::InvalidParameter,
    NvmError::NotManageable,
    NvmError::InvalidPermissions,
    NvmError::BadErrorCode,
    NvmError::DataTransferError,
    NvmError::DeviceError,
    NvmError::DeviceBusy,
    NvmError::BadPassphrase,
    NvmError::InvalidPassphrase,
    NvmError::SecurityFrozen,
    NvmError::LimitPassphrase,
    NvmError::SecurityDisabled,
    NvmError::BadDevice,
    NvmError::ArrayTooSmall,
    NvmError::BadCallback,
    NvmError::BadFile,
    NvmError::BadPool,
    NvmError::BadNamespace,
    NvmError::BadFirmware,
    NvmError::DriverFailed,
    NvmError::BadSecurityState,
    NvmError::NotFound,
    NvmError::ExceedsMaxSubscribers,
    NvmError::NotCached,
    NvmError::BadDriver,
];

impl NvmError {
    /// Numeric return code of this error (always negative).
    pub fn code(&self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::NoMemory => -2,
            Self::NotSupported => -3,
            Self::InvalidParameter => -4,
            Self::NotManageable => -5,
            Self::InvalidPermissions => -6,
            Self::BadErrorCode => -7,
            Self::DataTransferError => -8,
            Self::DeviceError => -9,
            Self::DeviceBusy => -10,
            Self::BadPassphrase => -11,
            Self::InvalidPassphrase => -12,
            Self::SecurityFrozen => -13,
            Self::LimitPassphrase => -14,
            Self::SecurityDisabled => -15,
            Self::BadDevice => -16,
            Self::ArrayTooSmall => -17,
            Self::BadCallback => -18,
            Self::BadFile => -19,
            Self::BadPool => -21,
            Self::BadNamespace => -22,
            Self::BadFirmware => -25,
            Self::DriverFailed => -26,
            Self::BadSecurityState => -30,
            Self::NotFound => -33,
            Self::ExceedsMaxSubscribers => -38,
            Self::NotCached => -40,
            Self::BadDriver => -46,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        ALL_ERRORS.iter().copied().find(|e| e.code() == code)
    }

    /// Short English description of the error.
    pub fn description(&self) -> String {
        self.to_string()
    }
}

/// Describe a raw return code.
///
/// Unmapped codes never describe successfully: the caller gets
/// [`NvmError::BadErrorCode`] so a bad code cannot slip through as text.
pub fn describe_return_code(code: i32) -> Result<String> {
    if code == NVM_SUCCESS {
        return Ok("The method succeeded.".to_string());
    }
    match NvmError::from_code(code) {
        Some(err) => Ok(err.description()),
        None => Err(NvmError::BadErrorCode),
    }
}

impl From<sqlx::Error> for NvmError {
    fn from(err: sqlx::Error) -> Self {
        tracing::warn!(error = %err, "Persistent store operation failed");
        NvmError::Unknown
    }
}

impl From<sqlx::migrate::MigrateError> for NvmError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        tracing::error!(error = %err, "Persistent store migration failed");
        NvmError::Unknown
    }
}

impl From<std::io::Error> for NvmError {
    fn from(err: std::io::Error) -> Self {
        tracing::warn!(error = %err, "I/O operation failed");
        NvmError::Unknown
    }
}

impl From<tokio::task::JoinError> for NvmError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::warn!(error = %err, "Blocking task failed");
        NvmError::Unknown
    }
}

pub type Result<T> = std::result::Result<T, NvmError>;

/// Outcome of a gather-as-much-as-possible operation.
///
/// `value` holds whatever could be collected; `first_error` is the first
/// failure met along the way, later failures are dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult<T> {
    pub value: T,
    pub first_error: Option<NvmError>,
}

impl<T> PartialResult<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            first_error: None,
        }
    }

    /// Record `err` unless an earlier error is already held.
    pub fn keep(&mut self, err: NvmError) {
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }

    /// Unwrap a step's result, keeping its error and yielding `None` on failure.
    pub fn take<U>(&mut self, result: Result<U>) -> Option<U> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.keep(e);
                None
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.first_error.is_none()
    }

    /// Collapse into a plain result, discarding the partial value on error.
    pub fn into_result(self) -> Result<T> {
        match self.first_error {
            None => Ok(self.value),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_and_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for err in ALL_ERRORS {
            assert!(err.code() < 0);
            assert!(seen.insert(err.code()), "duplicate code {}", err.code());
            assert_eq!(NvmError::from_code(err.code()), Some(err));
        }
    }

    #[test]
    fn test_describe_unknown_code_is_an_error() {
        assert_eq!(describe_return_code(-9999), Err(NvmError::BadErrorCode));
        assert_eq!(describe_return_code(12), Err(NvmError::BadErrorCode));
        assert!(describe_return_code(0).is_ok());
        assert_eq!(
            describe_return_code(-17).unwrap(),
            "The array is too small."
        );
    }

    #[test]
    fn test_partial_result_keeps_first_error() {
        let mut result = PartialResult::new(0u32);
        assert!(result.is_ok());
        result.keep(NvmError::DeviceBusy);
        result.keep(NvmError::Unknown);
        assert_eq!(result.first_error, Some(NvmError::DeviceBusy));

        let taken: Option<u8> = result.take(Err(NvmError::NotSupported));
        assert!(taken.is_none());
        assert_eq!(result.first_error, Some(NvmError::DeviceBusy));
        assert_eq!(result.into_result(), Err(NvmError::DeviceBusy));
    }
}
