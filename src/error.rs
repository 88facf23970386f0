//! Error types for codec and key-VM operations.

use thiserror::Error;

/// Error type for codec and key-VM operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unexpected end of buffer")]
    EndOfBuffer,
    #[error("bound exceeded: {0} > {1}")]
    BoundExceeded(usize, usize), // found, max
    #[error("length mismatch: {0} != {1}")]
    LengthMismatch(usize, usize), // found, expected
    #[error("unknown union discriminator: {0}")]
    UnknownDiscriminator(i128),
    #[error("inactive union case")]
    InactiveCase,
    #[error("no unused discriminator value for default case")]
    NoDefaultLabel,
    #[error("invalid discriminator type: {0}")]
    InvalidDiscriminator(&'static str),
    #[error("duplicate discriminator label: {0}")]
    DuplicateLabel(i128),
    #[error("union has no labeled cases: {0}")]
    EmptyUnion(String),
    #[error("duplicate mapping key")]
    DuplicateKey,
    #[error("invalid bool")]
    InvalidBool,
    #[error("invalid utf-8 in string")]
    InvalidUtf8,
    #[error("character outside ascii range: {0:?}")]
    InvalidChar(char),
    #[error("value does not match schema: expected {0}")]
    TypeMismatch(&'static str),
    #[error("unknown type: {0}")]
    UnknownType(String),
    #[error("unknown field in key list: {0}")]
    UnknownKeyField(String),
    #[error("missing struct field: {0}")]
    MissingField(String),
    #[error("key extraction unsupported for {0}")]
    UnsupportedKeyType(&'static str),
    #[error("recursive type cannot be compiled to key ops: {0}")]
    RecursiveType(String),
    #[error("malformed key program at op {0}")]
    MalformedProgram(usize),
    #[error("in {0}: {1}")]
    Context(String, #[source] Box<Error>),
}

impl Error {
    /// Wraps an error with the name of the enclosing field or type, building a
    /// path-like trail from the failure site to the root value.
    pub fn context(self, name: &str) -> Self {
        Error::Context(name.to_string(), Box::new(self))
    }
}
