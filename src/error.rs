use thiserror::Error;

/// Stable error ordinals. Each code corresponds to one exception class in a
/// language binding, so the discriminants are part of the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u32)]
pub enum ErrorCode {
    Ok = 0,
    OutOfMemory,
    UnableToReadFile,
    UnableToOpenFile,
    ConversionError,
    WrongStorage,
    ArgumentSize,
    MissingSystemObject,
    DatabaseNotOpen,
    InvalidIndex,
    InvalidAddress,
    AlreadyInTransaction,
}

impl ErrorCode {
    /// The stable ordinal of this code.
    pub fn ordinal(self) -> u32 {
        self as u32
    }

    /// Message used when an error is reported without a caller-supplied one.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::Ok => "EVERYTHING IS FINE",
            ErrorCode::OutOfMemory => "Unable to allocate an object",
            ErrorCode::UnableToReadFile => "Unable to read file",
            ErrorCode::UnableToOpenFile => "Unable to open file",
            ErrorCode::ConversionError => "Error during Unicode conversion",
            ErrorCode::WrongStorage => "Incorrect object storage type",
            ErrorCode::ArgumentSize => "Bad argument length",
            ErrorCode::MissingSystemObject => "Missing a critical system object",
            ErrorCode::DatabaseNotOpen => "Database must be open",
            ErrorCode::InvalidIndex => "Invalid index",
            ErrorCode::InvalidAddress => "Invalid address",
            ErrorCode::AlreadyInTransaction => {
                "An attempt was made to begin a transaction while one was already in progress"
            }
        }
    }
}

/// An error recorded against a database.
///
/// Every public call either succeeds or stores one of these on its database
/// and returns a benign value; fallible entry points additionally return the
/// same error. Check with [`crate::Database::ok`] and reset with
/// [`crate::Database::clear_error`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct DbError {
    pub code: ErrorCode,
    pub message: String,
}

impl DbError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        DbError {
            code,
            message: message.into(),
        }
    }

    /// An error carrying the code's default message.
    pub fn with_default(code: ErrorCode) -> Self {
        DbError {
            code,
            message: code.default_message().to_owned(),
        }
    }
}
