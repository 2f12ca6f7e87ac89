//! Module and code validation. Module-level checks run section by section
//! during decoding; the code validator is a single-pass type-checker over
//! each function's operator stream.

mod code;
mod module;

pub use code::CodeValidator;
pub use module::{
    declared_functions, validate_data_segments, validate_elem_segments, validate_exports,
    validate_function_declarations, validate_globals, validate_imports, validate_memories,
    validate_module, validate_start, validate_tables, validate_tags, validate_types,
};
