//! A compartmentalized WebAssembly engine core: binary decoder/encoder,
//! single-pass validator, ahead-of-time compiler interface, and a runtime
//! object model with isolated, garbage-collected compartments.

extern crate alloc;
extern crate core;

pub mod binary;
pub mod collections;
pub mod compile;
mod errors;
pub mod fuzzing;
mod i128;
pub mod indices;
pub mod ir;
pub mod printer;
pub mod runtime;
pub mod types;
mod traps;
mod utils;
mod v128;
pub mod validate;

pub use errors::{Error, LinkError, MissingImport, SerializationError, ValidationError};
pub use self::i128::I128;
pub use self::v128::V128;
pub use traps::Trap;
pub type Result<T> = core::result::Result<T, Error>;

/// WebAssembly page sizes are defined to be 64KiB.
pub const WASM_PAGE_SIZE: u64 = 0x10000;

/// The number of pages (for 32-bit memories) we can have before we run out of
/// byte index space.
pub const WASM32_MAX_PAGES: u64 = 1 << 16;
/// The number of pages (for 64-bit memories) we can have before we run out of
/// byte index space.
pub const WASM64_MAX_PAGES: u64 = 1 << 48;
/// Maximum size, in bytes, of 32-bit memories (4G)
pub const WASM32_MAX_SIZE: u64 = 1 << 32;

/// The absolute maximum number of bytes reserved for a single linear memory.
pub const MEMORY_RESERVE_MAX: usize = 1 << 32;
/// The absolute maximum size of a table in elements.
pub const TABLE_MAX: usize = 1 << 20;

/// Nesting depth bound for the code validator's control stack.
pub const MAX_CONTROL_DEPTH: usize = 4096;

pub fn host_page_size() -> usize {
    // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE).try_into().unwrap() }
}
