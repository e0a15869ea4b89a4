//! Error types for ferrotty.

use std::io;

use thiserror::Error;

/// Main error type for ferrotty operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Channel origin errors (spawn, PTY allocation, connect)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel operation errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Escape codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Session-level errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Malformed escape-encoded data.
///
/// Offsets are positions in the encoded input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended right after an escape marker.
    #[error("truncated escape sequence at offset {offset}")]
    TruncatedEscape { offset: usize },

    /// The escape marker was followed by a byte that never needs escaping.
    #[error("invalid escape continuation 0x{byte:02x} at offset {offset}")]
    InvalidEscape { offset: usize, byte: u8 },

    /// A control byte appeared outside of an escape sequence.
    #[error("unescaped control byte 0x{byte:02x} at offset {offset}")]
    UnescapedControl { offset: usize, byte: u8 },
}

/// Transport layer errors (spawn, PTY, TCP, SSH).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to spawn the target program
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// No pseudo-terminal could be allocated
    #[error("Failed to allocate pseudo-terminal: {0}")]
    PtyAllocation(#[source] io::Error),

    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host is not present in known_hosts and verification is strict
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the one recorded in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel layer errors (pattern matching, reads and writes, terminal modes).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Channel closed before a write could be delivered
    #[error("Channel closed")]
    Closed,

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// An expectation needs at least one pattern
    #[error("Expectation has no patterns")]
    EmptyExpectation,

    /// Read or write failure on the underlying channel
    #[error("Channel I/O error: {0}")]
    Io(#[from] io::Error),

    /// Terminal attribute query or update failed
    #[error("Terminal mode error: {0}")]
    Termios(#[source] nix::Error),

    /// `restore_mode` was called without a matching change
    #[error("No saved terminal mode to restore")]
    NoSavedMode,
}

/// Session-level errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Invalid configuration in the session builder
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A hand-off was requested but the session has no operator attached
    #[error("No operator terminal attached to the session")]
    NoOperator,

    /// Reading from or writing to the operator's terminal failed
    #[error("Operator terminal error: {0}")]
    Operator(#[source] io::Error),
}

/// Result type alias using ferrotty's Error.
pub type Result<T> = std::result::Result<T, Error>;
