//! # Ferrotty
//!
//! Expect-style automation of local programs, network peers and SSH
//! sessions, safe for arbitrary binary payloads.
//!
//! A [`Session`] sends bytes to a target, waits for patterns in what comes
//! back and, when something goes wrong, hands the live channel to a human.
//!
//! ## Features
//!
//! - Targets on a pseudo-terminal, over TCP, over SSH (via russh), or on a
//!   secondary terminal that another program (gdb, socat) attaches to
//! - Control bytes escaped with the terminal's literal-next character, so
//!   `^C` or `^D` in a payload reach the target instead of the line
//!   discipline
//! - Exact and regex patterns, with an optional search window
//! - Timeouts hand the channel to the operator instead of failing the script
//! - The target's exit code or fatal signal is mirrored onto the script
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferrotty::{Outcome, SessionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ferrotty::Error> {
//!     let mut target = SessionBuilder::process("./vuln").build().await?;
//!
//!     target.try_expect("Input: ").await?;
//!     target.send_line(b"AAAAAAAA\x03\x04\x7f").await?;
//!
//!     if let Outcome::Matched(_) = target.try_expect("$ ").await? {
//!         target.pwned().await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod channel;
pub mod cli;
pub mod codec;
pub mod error;
pub mod session;
pub mod terminal;
pub mod transport;

// Re-export main types for convenience
pub use bridge::{TtyBridge, TtyHandle};
pub use channel::{Expectation, Match, Pattern, ReadOutcome};
pub use cli::TargetArgs;
pub use error::{Error, Result};
pub use session::{
    ExpectOptions, HandOff, Operator, Outcome, Session, SessionBuilder, SessionConfig,
    TargetStatus, Termination,
};
pub use transport::{AnyTransport, AuthMethod, SshConfig, Transport};
