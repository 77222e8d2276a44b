//! Client-side IRC session engine.
//!
//! Dials an IRC server (plain TCP, or TLS on the well-known port 6697),
//! translates between wire lines and typed protocol messages, and runs a
//! single background dispatch task per session that routes inbound events
//! into bounded per-destination queues: one session-level feed plus one
//! feed per joined channel.
//!
//! # Modules
//!
//! - [`transport`] — Connection dialing and line-oriented I/O
//! - [`message`] — Wire codec: decoding inbound lines, encoding commands
//! - [`network`] — The session orchestrator and its dispatch loop
//! - [`channel`] — A joined channel: roster and message feed
//! - [`command`] — Slash-command parsing and input validation
//! - [`error`] — Error types
//!
//! # Example
//!
//! ```no_run
//! use irc_sdk::{Connection, Network};
//!
//! # async fn run() -> irc_sdk::Result<()> {
//! let conn = Connection::dial("irc.example.org", 6667).await?;
//! let network = Network::new(conn);
//! network.register("neo", "Thomas Anderson").await?;
//! network.start_listener();
//!
//! let channel = network.join_channel("#rust").await?;
//! channel.send_message("hello").await?;
//! while let Some(msg) = channel.receive_message().await {
//!     println!("{}", msg.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod command;
pub mod error;
pub mod message;
pub mod network;
pub mod transport;

pub use channel::{ChannelMessage, NetworkChannel};
pub use error::{Error, Result};
pub use network::{Network, NetworkMessage};
pub use transport::Connection;
