//! Error taxonomy shared by the codec, database, and channel layers.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// A file carried a format version this build does not read.
    VersionMismatch { found: u32, expected: u32 },
    /// A database's fingerprint width disagrees with what the caller needs.
    BitcountMismatch { found: u32, expected: u32 },
    /// A buffer or file ended before a read completed.
    TruncatedData,
    /// A builder input line with fewer than two whitespace-separated tokens.
    MalformedInputLine(String),
    /// A SMILES string the fingerprinter could not turn into a molecule.
    /// Per-record condition, recoverable by dropping the record.
    InvalidStructure(String),
    /// A response correlates to a different request. The channel is
    /// desynchronized and must be reconnected before reuse.
    RequestIdMismatch { sent: u32, received: u32 },
    /// The backend could not be reached or its response region never
    /// appeared within the retry bound.
    ChannelUnavailable(String),
    /// The wall-clock deadline for a response passed.
    TimedOut,
    /// A configuration file could not be read or parsed.
    Config(String),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::VersionMismatch { found, expected } => {
                write!(f, "format version mismatch: found {}, expected {}", found, expected)
            }
            Error::BitcountMismatch { found, expected } => {
                write!(f, "fingerprint bitcount mismatch: found {}, expected {}", found, expected)
            }
            Error::TruncatedData => write!(f, "truncated data"),
            Error::MalformedInputLine(line) => {
                write!(f, "malformed input line (need '<smiles> <id>'): {:?}", line)
            }
            Error::InvalidStructure(smiles) => write!(f, "invalid structure: {:?}", smiles),
            Error::RequestIdMismatch { sent, received } => {
                write!(f, "request id mismatch: sent {}, received {}", sent, received)
            }
            Error::ChannelUnavailable(reason) => write!(f, "channel unavailable: {}", reason),
            Error::TimedOut => write!(f, "timed out waiting for response"),
            Error::Config(reason) => write!(f, "bad configuration: {}", reason),
            Error::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}
