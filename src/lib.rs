//! Authentication negotiation core for SMB/CIFS session setup.
//!
//! The crate selects, drives and wraps a security mechanism (NTLMSSP or Kerberos) inside a
//! GSS-API/SPNEGO envelope, on both the client and the server side.
//!
//! * [`negotiate::NegotiateClient`] runs the client logon: it walks the configured
//!   [security levels](policy::SecurityPolicy) from the highest down, picks a mechanism offered by
//!   the server and drives round-trips through a caller supplied [`Transport`](negotiate::Transport).
//! * [`negotiate::ServerDispatcher`] answers one inbound security blob at a time and hands the
//!   extracted [`Passwords`](ntlm::Passwords) back to the caller, which owns the actual
//!   credential verification.

#[macro_use]
extern crate tracing;

pub mod ber;
pub mod crypter;
pub mod kerberos;
pub mod negotiate;
pub mod ntlm;
pub mod oids;
pub mod policy;

mod auth_identity;
mod crypto;
mod secret;
mod utils;

use std::{error, fmt, io, result};

use num_derive::{FromPrimitive, ToPrimitive};

pub use self::auth_identity::Credentials;
pub use self::crypter::{EncryptedCredentials, PasswordEncryptor};
pub use self::negotiate::{
    NegotiateClient, NegotiateConfig, NegotiationOutcome, ServerConfig, ServerDispatcher, SessionKeys, Transport,
    TransportError,
};
pub use self::ntlm::{AuthSession, Passwords};
pub use self::policy::{MechanismMask, PasswordAlgorithm, SecurityLevel, SecurityPolicy};
pub use self::secret::Secret;

pub type Result<T> = result::Result<T, Error>;

/// The kind of a negotiation error.
///
/// The numeric values follow the SSPI `SEC_E_*` codes so that a host translating them to
/// NTSTATUS values can do so with a single table.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ErrorKind {
    Unknown = 0,
    /// Allocation or buffer growth failed. The caller may retry, e.g. at a smaller level.
    InsufficientMemory = 0x8009_0300,
    UnsupportedFunction = 0x8009_0302,
    /// May correspond to any internal error (I/O error, exhausted retries, etc.).
    InternalError = 0x8009_0304,
    /// The requested or offered mechanism is not supported by this side.
    SecurityPackageNotFound = 0x8009_0305,
    /// Used in cases when supplied data is missing, truncated or has an unexpected tag.
    InvalidToken = 0x8009_0308,
    LogonDenied = 0x8009_030C,
    NoCredentials = 0x8009_030E,
    /// Used when a message arrives in a state that does not expect it.
    OutOfSequence = 0x8009_0310,
    BufferTooSmall = 0x8009_0321,
    /// The security level is disabled or requires an algorithm that is turned off.
    AlgorithmMismatch = 0x8009_0331,
    InvalidParameter = 0x8009_035D,
    NoContext = 0x8009_0361,
}

/// Holds the [`ErrorKind`] and the description of the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error_type: ErrorKind,
    pub description: String,
}

impl Error {
    /// Allows to fill a new error easily, supplying it with a coherent description.
    pub fn new(error_type: ErrorKind, description: impl ToString) -> Self {
        Self {
            error_type,
            description: description.to_string(),
        }
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.description)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                Self::new(ErrorKind::InvalidToken, format!("malformed security blob: {err}"))
            }
            _ => Self::new(ErrorKind::InternalError, format!("IO error: {err:?}")),
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Self::new(ErrorKind::InsufficientMemory, err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::other(format!("{:?}: {}", err.error_type, err.description))
    }
}

/// Outcome of a single mechanism step that is not an error.
///
/// Authentication acceptance is deliberately not decided here: a server mechanism that has
/// parsed the final client message reports [`SecurityStatus::CompleteNeeded`] and the caller
/// verifies the extracted credentials itself.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SecurityStatus {
    Ok = 0,
    /// More processing required: another round-trip is expected.
    ContinueNeeded = 0x0009_0312,
    /// Parsed successfully, not yet authenticated.
    CompleteNeeded = 0x0009_0313,
}
