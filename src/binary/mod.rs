//! The bidirectional binary codec for the module format: LEB128 integers,
//! section framing, type encodings, the operator stream, and the name
//! section. Decoding invokes the validator section-by-section so that later
//! sections can rely on already-validated facts.

mod leb128;
mod module;
mod names;
mod operators;
mod stream;
mod types;

pub use module::{decode_module, encode_module};
pub use names::{decode_name_section, encode_name_section, NAME_SECTION};
pub use operators::{OperatorsReader, OperatorsWriter};
pub use stream::{Reader, Writer};
