// logtrail - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation. All errors preserve the causal chain
// for diagnostic logging.

use std::fmt;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Local};

/// Top-level error type for all logtrail operations.
#[derive(Debug)]
pub enum CoreError {
    /// A tailed or templated path does not (yet) exist. Recoverable by
    /// waiting (`Watcher::await_exists`).
    NotFound { path: PathBuf },

    /// A write was rejected because its bucket precedes the highest bucket
    /// already written/sealed by the pool. The record is dropped, not
    /// retried; this is not fatal.
    TimePast {
        bucket: DateTime<Local>,
        last_written: DateTime<Local>,
    },

    /// Segment-level codec corruption. Fatal for that segment; the caller
    /// decides whether to quarantine it.
    InvalidSegment {
        file: PathBuf,
        record_index: u64,
        cause: Box<CoreError>,
    },

    /// A row failed to encode or decode for reasons below the segment
    /// layer (checksum mismatch, malformed length fields, unknown format).
    Codec(CodecError),

    /// Underlying syscall failure. Fatal for the owning pipeline.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },

    /// Configuration could not be loaded or failed validation.
    Config(ConfigError),

    /// Cooperative shutdown. Not an error — callers must not log this as a
    /// failure.
    Cancelled,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "path '{}' does not exist", path.display()),
            Self::TimePast {
                bucket,
                last_written,
            } => write!(
                f,
                "bucket {bucket} is before the last written bucket {last_written}"
            ),
            Self::InvalidSegment {
                file,
                record_index,
                cause,
            } => write!(
                f,
                "invalid segment '{}' at record {record_index}: {cause}",
                file.display()
            ),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidSegment { cause, .. } => Some(cause),
            Self::Codec(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for CoreError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// The stage at which a framed-binary row's checksum was found to mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStage {
    /// The header checksum, covering the fixed-width length-prefix fields.
    /// Caught before any length-prefixed buffer is allocated.
    Header,
    /// The trailer checksum, covering the full row including payloads.
    Trailer,
}

impl fmt::Display for ChecksumStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => write!(f, "header"),
            Self::Trailer => write!(f, "trailer"),
        }
    }
}

/// Errors raised by the segment row codec.
#[derive(Debug)]
pub enum CodecError {
    /// A FNV-32a checksum did not match the bytes it covers.
    ChecksumMismatch {
        stage: ChecksumStage,
        expected: u32,
        actual: u32,
    },

    /// A row claims both `text` and `bin` payloads, or neither, violating
    /// the mutual-exclusion invariant.
    AmbiguousPayload,

    /// The stream ended mid-row (a partial header or payload).
    UnexpectedEof,

    /// Line-delimited JSON row could not be parsed.
    Json {
        line: u64,
        source: serde_json::Error,
    },

    /// A `bin` payload's base64 text (JSON format) failed to decode.
    Base64 {
        line: u64,
        source: base64::DecodeError,
    },

    /// An I/O error while reading/writing a row.
    Io(io::Error),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChecksumMismatch {
                stage,
                expected,
                actual,
            } => write!(
                f,
                "{stage} checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
            ),
            Self::AmbiguousPayload => {
                write!(f, "row has both text and bin payloads, or neither")
            }
            Self::UnexpectedEof => write!(f, "unexpected end of stream mid-row"),
            Self::Json { line, source } => write!(f, "line {line}: invalid JSON row: {source}"),
            Self::Base64 { line, source } => {
                write!(f, "line {line}: invalid base64 payload: {source}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json { source, .. } => Some(source),
            Self::Base64 { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to loading a single source's configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading the config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience alias for fallible core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
