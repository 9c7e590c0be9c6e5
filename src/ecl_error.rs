//! Errors reading or writing ECLIPSE array files
use std::fmt::Display;
use pest::RuleType;

use crate::arrays::ElementKind;

/// Type alias for a `Result` with [`EclError`] as the error type.
pub type EclResult<T> = Result<T, EclError>;


/// An error related to encoding, decoding, or indexing an ECLIPSE array file
#[derive(Debug)]
pub enum EclError {
    /// The underlying file could not be opened, read, or written.
    Io(std::io::Error),

    /// The file does not start with a recognizable record header or formatted marker line.
    /// This is raised when opening a file and no partial reader is returned.
    FileFormat(String),

    /// A record's block length markers disagree, or its declared count does not match
    /// the bytes available. Only the record named is affected; the rest of the file's
    /// directory stays usable.
    CorruptRecord{ name: String, reason: String },

    /// A token in a formatted file could not be parsed as the declared element kind.
    Parse{ token: String, kind: &'static str, reason: String },

    /// The requested report step is not present in the restart index.
    StepNotFound(i32),

    /// The caller supplied an array that cannot be encoded (count/payload disagreement,
    /// an over-long name or string, etc.)
    Format(String),

    /// No record with this name exists in the file (or report step).
    KeyNotFound(String),

    /// A directory index past the end of the directory was requested.
    IndexOutOfRange{ index: usize, len: usize },

    /// A typed accessor was called on an array holding a different element kind.
    KindMismatch{ name: String, expected: ElementKind, found: ElementKind },
}

impl Display for EclError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EclError::Io(e) => write!(f, "I/O error: {e}"),
            EclError::FileFormat(reason) => write!(f, "Not a valid ECLIPSE array file: {reason}"),
            EclError::CorruptRecord { name, reason } => {
                write!(f, "Record '{name}' is corrupt: {reason}")
            },
            EclError::Parse { token, kind, reason } => {
                write!(f, "Could not parse '{token}' as a {kind}: {reason}")
            },
            EclError::StepNotFound(step) => write!(f, "Report step {step} is not in the file"),
            EclError::Format(reason) => write!(f, "Array cannot be encoded: {reason}"),
            EclError::KeyNotFound(name) => write!(f, "key '{name}' not found"),
            EclError::IndexOutOfRange { index, len } => {
                write!(f, "Record index {index} is out of range for a file with {len} records")
            },
            EclError::KindMismatch { name, expected, found } => {
                write!(f, "Array '{name}' holds {found} values, but {expected} values were requested")
            },
        }
    }
}

impl std::error::Error for EclError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EclError::Io(e) => Some(e),
            _ => None
        }
    }
}

impl From<std::io::Error> for EclError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl EclError {
    pub fn from_pest<R: RuleType>(e: pest::error::Error<R>, s: String, t: &'static str) -> Self {
        Self::Parse { token: s, kind: t, reason: e.to_string() }
    }

    pub(crate) fn corrupt<N: Into<String>, S: Into<String>>(name: N, reason: S) -> Self {
        Self::CorruptRecord { name: name.into(), reason: reason.into() }
    }

    /// `true` if this is an [`EclError::CorruptRecord`]
    pub fn is_corrupt_record(&self) -> bool {
        matches!(self, Self::CorruptRecord { .. })
    }

    /// `true` if this is an [`EclError::FileFormat`]
    pub fn is_file_format(&self) -> bool {
        matches!(self, Self::FileFormat(_))
    }

    /// `true` if this is an [`EclError::Parse`]
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }

    /// `true` if this is an [`EclError::Format`]
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}
