//! Protocol module containing message types, the binary codec, and async framing.

pub mod codec;
pub mod framing;
pub mod messages;
pub mod sequence;

pub use codec::{decode_message, encode_message, ProtocolError};
pub use framing::{read_message, write_message, FrameError};
pub use messages::*;
pub use sequence::SequenceCounter;
