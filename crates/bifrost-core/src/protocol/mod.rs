//! Protocol module containing the BAPS3 tokeniser and message type.

pub mod message;
pub mod tokeniser;

pub use message::{Message, MessageError};
pub use tokeniser::{Line, TokeniseError, Tokeniser, DEFAULT_MAX_LINE_LEN};
