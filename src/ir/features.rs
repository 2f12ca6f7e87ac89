/// The set of WebAssembly proposals a module is allowed to use.
///
/// The decoder, validator and runtime all consult the same feature spec;
/// using a construct whose flag is off is a validation error (or, for
/// encoding-level constructs, a serialization error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSpec {
    /// Always on; gives the operator table a uniform feature column.
    pub mvp: bool,

    pub simd: bool,
    pub atomics: bool,
    pub exception_handling: bool,
    pub multiple_results_and_block_params: bool,
    pub bulk_memory_operations: bool,
    pub reference_types: bool,
    pub non_trapping_float_to_int: bool,
    pub sign_extension: bool,

    pub multiple_memories: bool,
    pub multiple_tables: bool,
    pub memory64: bool,
    pub table64: bool,
    pub shared_tables: bool,
    pub import_export_mutable_globals: bool,
    pub extended_name_section: bool,
}

impl FeatureSpec {
    /// Wasm 1.0 with no extensions.
    pub fn mvp() -> Self {
        Self {
            mvp: true,
            simd: false,
            atomics: false,
            exception_handling: false,
            multiple_results_and_block_params: false,
            bulk_memory_operations: false,
            reference_types: false,
            non_trapping_float_to_int: false,
            sign_extension: false,
            multiple_memories: false,
            multiple_tables: false,
            memory64: false,
            table64: false,
            shared_tables: false,
            import_export_mutable_globals: false,
            extended_name_section: false,
        }
    }

    /// Wasm 1.0 plus the standardized proposals.
    pub fn standard() -> Self {
        Self {
            simd: true,
            multiple_results_and_block_params: true,
            bulk_memory_operations: true,
            reference_types: true,
            non_trapping_float_to_int: true,
            sign_extension: true,
            import_export_mutable_globals: true,
            extended_name_section: true,
            ..Self::mvp()
        }
    }

    /// Every feature this engine understands.
    pub fn all() -> Self {
        Self {
            atomics: true,
            exception_handling: true,
            multiple_memories: true,
            multiple_tables: true,
            memory64: true,
            table64: true,
            shared_tables: true,
            ..Self::standard()
        }
    }
}

impl Default for FeatureSpec {
    fn default() -> Self {
        Self::standard()
    }
}
