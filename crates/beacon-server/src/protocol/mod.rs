//! Wire frames, topic derivation, and the object-reference codec.

pub mod frames;
pub mod parser;
pub mod reference;

pub use frames::{ClientFrame, FrameId, SUPPORTED_PROTOCOLS, ServerFrame, StartPayload};
pub use parser::{HANDLE_KEY_PREFIX, handle_key, topic_from_query, topic_key};
pub use reference::{ObjectRef, restore_references};
