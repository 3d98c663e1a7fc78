//! # bifrost-core
//!
//! Shared protocol library for Bifrost, the BAPS3-to-WebSocket bridge.
//!
//! It has zero dependencies on sockets, async runtimes or configuration; the
//! bridge crate does all of the I/O and feeds bytes through this crate.
//!
//! # Architecture overview (for beginners)
//!
//! BAPS3 is the text control protocol spoken by radio playout servers such as
//! `playd`.  A server sends lines like:
//!
//! ```text
//! OHAI 'playd 0.2.0'
//! STATE Playing
//! TIME 1500000
//! ```
//!
//! This crate turns those raw bytes into structured values in two steps:
//!
//! - **`protocol::tokeniser`**: bytes to lines of words.  It copes with quoting,
//!   escaping and lines that arrive split across several TCP reads.
//! - **`protocol::message`**: a line of words to a [`Message`] (command word
//!   plus arguments), and a `Message` back to quoted wire text.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `bifrost_core::Tokeniser` instead of `bifrost_core::protocol::tokeniser::Tokeniser`.
pub use protocol::message::{Message, MessageError};
pub use protocol::tokeniser::{Line, TokeniseError, Tokeniser};
