use openflow::messages::*;
use std::error;
use std::fmt;
use std::io;
use std::result;

/// Every failure the protocol layer can run into.
///
/// All variants except `Io` carry an OpenFlow error type implicitly and
/// a typed code explicitly, so they can be answered with an `OfpErrorMsg`.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    HelloFailed(OfpHelloFailedCode),
    BadRequest(OfpBadRequestCode),
    BadAction(OfpBadActionCode),
    BadInstruction(OfpBadInstructionCode),
    BadMatch(OfpBadMatchCode),
    FlowModFailed(OfpFlowModFailedCode),
    GroupModFailed(OfpGroupModFailedCode),
    PortModFailed(OfpPortModFailedCode),
    TableModFailed(OfpTableModFailedCode),
    SwitchConfigFailed(OfpSwitchConfigFailedCode),
    RoleRequestFailed(OfpRoleRequestFailedCode),
}

impl Error {
    /// The (type, code) pair to put on the wire, `None` for transport failures.
    pub fn wire_code(&self) -> Option<(OfpErrorType, u16)> {
        Some(match *self {
            Error::Io(_) => return None,
            Error::HelloFailed(c) => (OfpErrorType::HelloFailed, c as u16),
            Error::BadRequest(c) => (OfpErrorType::BadRequest, c as u16),
            Error::BadAction(c) => (OfpErrorType::BadAction, c as u16),
            Error::BadInstruction(c) => (OfpErrorType::BadInstruction, c as u16),
            Error::BadMatch(c) => (OfpErrorType::BadMatch, c as u16),
            Error::FlowModFailed(c) => (OfpErrorType::FlowModFailed, c as u16),
            Error::GroupModFailed(c) => (OfpErrorType::GroupModFailed, c as u16),
            Error::PortModFailed(c) => (OfpErrorType::PortModFailed, c as u16),
            Error::TableModFailed(c) => (OfpErrorType::TableModFailed, c as u16),
            Error::SwitchConfigFailed(c) => (OfpErrorType::SwitchConfigFailed, c as u16),
            Error::RoleRequestFailed(c) => (OfpErrorType::RoleRequestFailed, c as u16),
        })
    }

    /// Shorthand for the most common decoding failure
    pub fn bad_len() -> Error {
        Error::BadRequest(OfpBadRequestCode::BadLen)
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        "OpenFlow protocol error"
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "{}", e),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(ioe) => ioe,
            _ => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
