//! Error taxonomy
//!
//! Satu enum per layer. Semua error decode di sisi inbound bersifat fatal untuk
//! connection yang bersangkutan; error di sisi outbound (`SendError`) hanya
//! dikembalikan ke pemanggil dan tidak menutup connection.

use std::fmt;

use thiserror::Error;

use crate::core::ObjectId;

/// Schema construction failure. Never recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("interface `{0}` is declared more than once")]
    DuplicateInterface(String),
    #[error("interface `{interface}` must have a version of at least 1")]
    ZeroVersion { interface: String },
    #[error("{interface}: {direction} opcode {opcode} is declared more than once")]
    DuplicateOpcode {
        interface: String,
        direction: &'static str,
        opcode: u16,
    },
    #[error("{interface}: {direction} opcodes must be contiguous, expected {expected} but found {found}")]
    OpcodeGap {
        interface: String,
        direction: &'static str,
        expected: u16,
        found: u16,
    },
    #[error("{interface}: {direction} `{name}` is declared more than once")]
    DuplicateMessage {
        interface: String,
        direction: &'static str,
        name: String,
    },
    #[error("{interface}.{message}: field `{field}` references undeclared interface `{target}`")]
    UnknownInterface {
        interface: String,
        message: String,
        field: String,
        target: String,
    },
    #[error("{interface}.{message}: since must be positive")]
    InvalidSince { interface: String, message: String },
    #[error("{interface}.{message}: since {since} exceeds interface version {version}")]
    SinceAboveVersion {
        interface: String,
        message: String,
        since: u32,
        version: u32,
    },
    #[error("{interface}.{message}: new id field `{field}` must name a concrete, non-nullable interface")]
    UntypedNewId {
        interface: String,
        message: String,
        field: String,
    },
    #[error("{interface}.{message}: field `{field}` takes its version from `{source_field}`, which is not a preceding u32 field")]
    BadVersionSource {
        interface: String,
        message: String,
        field: String,
        source_field: String,
    },
    #[error("{interface}.{message}: field `{field}` has invalid fixed-point precision {bits}")]
    BadFixedPrecision {
        interface: String,
        message: String,
        field: String,
        bits: u8,
    },
    #[error("interface `{0}` is not part of the schema")]
    NoSuchInterface(String),
    #[error("interface `{interface}` has no {direction} with opcode {opcode}")]
    NoSuchMessage {
        interface: String,
        direction: &'static str,
        opcode: u16,
    },
}

/// Error membaca file schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("failed to read schema source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Malformed argument payload (or invalid outbound argument set).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("field `{field}` needs {needed} bytes but only {available} remain in the payload")]
    Truncated {
        field: String,
        needed: usize,
        available: usize,
    },
    #[error("field `{field}` is not valid UTF-8")]
    InvalidUtf8 { field: String },
    #[error("field `{field}` is missing its NUL terminator")]
    MissingNul { field: String },
    #[error("field `{field}` contains an interior NUL byte")]
    InteriorNul { field: String },
    #[error("field `{field}` is null but not declared nullable")]
    UnexpectedNull { field: String },
    #[error("field `{field}` references unknown object {id}")]
    UnknownObject { field: String, id: ObjectId },
    #[error("field `{field}` references {id} of interface `{found}`, expected `{expected}`")]
    WrongInterface {
        field: String,
        id: ObjectId,
        expected: String,
        found: String,
    },
    #[error("{count} trailing bytes after the last field")]
    TrailingBytes { count: usize },
    #[error("expected {expected} arguments, got {found}")]
    ArgCount { expected: usize, found: usize },
    #[error("field `{field}` expects a {expected} argument")]
    TypeMismatch { field: String, expected: &'static str },
    #[error("field `{field}` requests version {requested}, interface `{interface}` supports 1..={max}")]
    BadNewIdVersion {
        field: String,
        interface: String,
        requested: u32,
        max: u32,
    },
}

/// Bad envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("message size {size} is smaller than the 8-byte header")]
    SizeTooSmall { size: u16 },
    #[error("message size {size} is not a multiple of 4")]
    Misaligned { size: u16 },
    #[error("message size {size} exceeds the limit of {max} bytes")]
    TooLarge { size: usize, max: usize },
}

/// Object Table violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("object {0} does not exist")]
    NotFound(ObjectId),
    #[error("object id {0} is already in use")]
    AlreadyLive(ObjectId),
    #[error("object id {0} is outside the range the allocating side may use")]
    OutOfRange(ObjectId),
    #[error("object {0} is still live and cannot be released")]
    StillLive(ObjectId),
    #[error("no free object ids left")]
    Exhausted,
    #[error("message addressed to the null object id")]
    NullTarget,
}

/// Message used below its `since` gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{interface}.{message} requires version {since}, but {object} was negotiated at version {version}")]
pub struct VersionError {
    pub object: ObjectId,
    pub interface: String,
    pub message: String,
    pub since: u32,
    pub version: u32,
}

/// Root cause of a terminal [`ProtocolError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error("interface `{interface}` has no {direction} with opcode {opcode}")]
    UnknownOpcode {
        interface: String,
        direction: &'static str,
        opcode: u16,
    },
}

/// Wire error codes dari display object (invalid_object, invalid_method, implementation).
pub const CODE_INVALID_OBJECT: u32 = 0;
pub const CODE_INVALID_METHOD: u32 = 1;
pub const CODE_IMPLEMENTATION: u32 = 3;

/// Terminal error of a connection, with enough context to diagnose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    /// Target object of the offending message, if the header was readable.
    pub object: Option<ObjectId>,
    pub opcode: Option<u16>,
    /// Byte offset of the offending message in the inbound stream.
    pub offset: u64,
    pub kind: ErrorKind,
}

impl ProtocolError {
    pub fn new(
        kind: impl Into<ErrorKind>,
        object: Option<ObjectId>,
        opcode: Option<u16>,
        offset: u64,
    ) -> Self {
        Self {
            object,
            opcode,
            offset,
            kind: kind.into(),
        }
    }

    /// Code yang dikirim ke peer lewat event `error` milik display object.
    pub fn wire_code(&self) -> u32 {
        match self.kind {
            ErrorKind::Object(_) => CODE_INVALID_OBJECT,
            ErrorKind::Codec(CodecError::UnknownObject { .. }) => CODE_INVALID_OBJECT,
            ErrorKind::UnknownOpcode { .. }
            | ErrorKind::Version(_)
            | ErrorKind::Codec(_)
            | ErrorKind::Framing(_) => CODE_INVALID_METHOD,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol error at byte {}", self.offset)?;
        if let Some(object) = self.object {
            write!(f, " (object {}", object)?;
            if let Some(opcode) = self.opcode {
                write!(f, ", opcode {}", opcode)?;
            }
            write!(f, ")")?;
        }
        write!(f, ": {}", self.kind)
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Local API misuse. Nothing has been written when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,
    #[error("interface `{0}` is not part of the schema")]
    UnknownInterface(String),
    #[error("interface `{interface}` has no {direction} with opcode {opcode}")]
    UnknownOpcode {
        interface: String,
        direction: &'static str,
        opcode: u16,
    },
    #[error("interface `{interface}` has no {direction} named `{name}`")]
    UnknownMessage {
        interface: String,
        direction: &'static str,
        name: String,
    },
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("outbound buffer is full ({pending} bytes pending, limit {limit})")]
    BufferFull { pending: usize, limit: usize },
}

/// Error memuat konfigurasi.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
