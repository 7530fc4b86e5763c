//! # Error Definitions
//!
//! Every failure the codec can report, from a short read to a bad field deep
//! inside a nested record.

/// Varpack serialization and deserialization errors.
#[derive(Debug, Clone)]
pub enum Error {
    /// The source ended in the middle of a value.
    UnexpectedEnd,
    /// The underlying reader failed.
    Io { kind: std::io::ErrorKind, message: String },
    /// A varint ran past ten bytes or past 64 bits.
    VarintOverflow,
    /// A decoded integer does not fit the destination width.
    IntOutOfRange { ty: &'static str, value: i128 },
    /// A boolean byte other than `0` or `1`.
    InvalidBool(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Scalar value is not a valid `char`.
    InvalidChar(u32),
    /// Enum-like discriminant out of range (e.g. `Result` tag).
    InvalidDiscriminant { ty: &'static str, value: u8 },
    /// Enum variant index with no matching variant.
    UnknownVariant { ty: &'static str, index: u64 },
    /// A declared length exceeds the decoder's limit.
    LengthLimit { len: u64, max: usize },
    /// A type's own binary representation could not be produced or parsed.
    Marshal(String),
    /// Decoding a named field failed.
    Field {
        field: &'static str,
        ty: &'static str,
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps `source` with the field name and nominal type being decoded.
    pub fn field(field: &'static str, ty: &'static str, source: Error) -> Self {
        Error::Field { field, ty, source: Box::new(source) }
    }

    /// Returns the innermost error, looking through any field wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Field { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True when the source itself failed (short read or I/O), as opposed to
    /// well-framed bytes of the wrong shape. After a stream failure nothing
    /// further can be read from the same decoder.
    pub fn is_stream(&self) -> bool {
        matches!(self.root_cause(), Error::UnexpectedEnd | Error::Io { .. })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd => write!(f, "unexpected end of input"),
            Error::Io { kind, message } => write!(f, "i/o error ({:?}): {}", kind, message),
            Error::VarintOverflow => write!(f, "varint overflows 64 bits"),
            Error::IntOutOfRange { ty, value } => write!(f, "value {} out of range for {}", value, ty),
            Error::InvalidBool(b) => write!(f, "invalid bool byte: {:#04x}", b),
            Error::InvalidUtf8 => write!(f, "invalid utf-8"),
            Error::InvalidChar(c) => write!(f, "invalid char scalar: {:#x}", c),
            Error::InvalidDiscriminant { ty, value } => write!(f, "invalid {} discriminant: {}", ty, value),
            Error::UnknownVariant { ty, index } => write!(f, "unknown {} variant index: {}", ty, index),
            Error::LengthLimit { len, max } => write!(f, "length {} exceeds limit {}", len, max),
            Error::Marshal(msg) => write!(f, "binary marshal failed: {}", msg),
            Error::Field { field, ty, source } => write!(f, "decoding field `{}` ({}): {}", field, ty, source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Field { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::UnexpectedEnd,
            kind => Error::Io { kind, message: e.to_string() },
        }
    }
}

/// Specialized `Result` for Varpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Attaches field context to a decode result.
pub trait FieldContext<T> {
    fn in_field(self, field: &'static str, ty: &'static str) -> Result<T>;
}

impl<T> FieldContext<T> for Result<T> {
    fn in_field(self, field: &'static str, ty: &'static str) -> Result<T> {
        self.map_err(|e| Error::field(field, ty, e))
    }
}
