//! Custom error types for the hypercard-reader crate.

use thiserror::Error;

/// The primary error type for all operations in this crate.
#[derive(Debug, Error)]
pub enum StackError {
    /// A read would cross the end of its data range.
    #[error("Read of {length} bytes at offset {offset} exceeds range of {available} bytes")]
    OutOfRange {
        offset: usize,
        length: usize,
        available: usize,
    },

    /// A block declares a length that does not fit in its buffer.
    #[error("Corrupt block at offset {offset}: declared length {declared} does not fit in {remaining} remaining bytes")]
    CorruptBlock {
        offset: usize,
        declared: usize,
        remaining: usize,
    },

    /// The stack graph is structurally invalid.
    #[error("Corrupted stack: {0}")]
    CorruptedStack(String),

    /// The resource fork container is structurally invalid.
    #[error("Corrupt resource fork: {0}")]
    CorruptResourceFork(String),

    /// The stack is private access and cannot be opened without a password.
    #[error("The stack is protected by a password, but none was provided.")]
    MissingPassword,

    /// The provided password does not match the stack's password hash.
    #[error("The provided password is wrong.")]
    WrongPassword,

    /// A sound resource declares a format this decoder does not handle.
    #[error("Unsupported sound format: {0:#x}")]
    UnsupportedFormat(u16),

    /// A sound resource carries a command list other than a plain play command.
    #[error("Unsupported sound command list: {0:?}")]
    UnsupportedCommandList(Vec<u16>),

    /// A compressed sound uses a compression scheme this decoder does not handle.
    #[error("Unsupported sound compression: {0}")]
    UnsupportedCompression(String),

    /// A bitmap block is malformed or truncated.
    #[error("Corrupt image: {0}")]
    CorruptImage(String),
}

/// A convenience `Result` type alias using the crate's `StackError` type.
pub type Result<T> = std::result::Result<T, StackError>;
