//! Line-oriented control server
//!
//! Clients connect over TCP, edit the shared TermSet with comma-separated
//! batches of terms, and issue `^` commands. Every response line ends in
//! `\r\n` and a `:` prompt follows each processed line.

pub mod codec;
pub mod command;
pub mod disk;
pub mod server;
pub mod session;

pub use codec::{ControlLineCodec, LineError};
pub use command::{parse_line, Command, Token};
pub use disk::{disk_usage, DiskUsage};
pub use server::ControlServer;
pub use session::{run_session, SessionContext};
