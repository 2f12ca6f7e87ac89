//! The compiler boundary. The backend itself lives outside this crate; the
//! runtime only relies on the contract below: `compile` lowers a validated
//! module to opaque object code, `load` turns that object code into one
//! invocable thunk per defined function.

use crate::errors::CompileError;
use crate::indices::DefinedFuncIndex;
use crate::ir::{CustomSection, Module, OrderedSection};
use crate::runtime::{ContextRuntimeData, UntaggedValue};
use crate::validate;
use crate::Trap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use cranelift_entity::PrimaryMap;

/// The custom section used to cache compiled object code alongside the
/// module bytes.
pub const PRECOMPILED_OBJECT_SECTION: &str = "karst.precompiled_object";

/// Opaque, linkable object code produced by a backend.
#[derive(Debug, Clone)]
pub struct ObjectCode {
    bytes: Vec<u8>,
}

impl ObjectCode {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One compiled function's entry point.
///
/// The thunk receives the per-context runtime data (through which compiled
/// code reaches memory and table base addresses and mutable globals) and a
/// single buffer holding the arguments at type-aligned offsets; results are
/// written back to the same buffer starting at offset zero.
pub type FunctionThunk =
    Arc<dyn Fn(&mut ContextRuntimeData, &mut [UntaggedValue]) -> Result<(), Trap> + Send + Sync>;

/// The result of loading object code: a stable invocation entry per defined
/// function.
pub struct LoadedModule {
    pub thunks: PrimaryMap<DefinedFuncIndex, FunctionThunk>,
}

impl LoadedModule {
    /// Builds a loaded module from thunks in defined-function order.
    pub fn new(thunks: impl IntoIterator<Item = FunctionThunk>) -> Self {
        let mut map = PrimaryMap::new();
        for thunk in thunks {
            map.push(thunk);
        }
        Self { thunks: map }
    }

    /// A loaded module for a module with no defined functions.
    pub fn empty() -> Self {
        Self {
            thunks: PrimaryMap::new(),
        }
    }
}

/// A module ready for instantiation: its IR plus loaded code.
pub struct CompiledModule {
    pub module: Arc<Module>,
    pub loaded: LoadedModule,
}

/// The backend contract.
pub trait Compiler {
    /// Lowers a validated module to object code.
    fn compile(&self, module: &Module) -> Result<ObjectCode, CompileError>;

    /// Loads previously produced object code for `module`.
    fn load(&self, module: &Module, code: &ObjectCode) -> Result<LoadedModule, CompileError>;
}

/// Validates and compiles `module`, returning a handle usable for
/// instantiation.
pub fn compile_module(
    compiler: &dyn Compiler,
    module: Arc<Module>,
) -> Result<CompiledModule, CompileError> {
    validate::validate_module(&module)?;
    let code = compiler.compile(&module)?;
    let loaded = compiler.load(&module, &code)?;
    Ok(CompiledModule {
        module,
        loaded,
    })
}

/// Attaches object code to a module as a custom section, for caching to
/// disk with the module bytes.
pub fn attach_precompiled_object(module: &mut Module, code: &ObjectCode) {
    module
        .custom_sections
        .retain(|section| section.name != PRECOMPILED_OBJECT_SECTION);
    module.custom_sections.push(CustomSection {
        after_section: OrderedSection::Data,
        name: PRECOMPILED_OBJECT_SECTION.into(),
        bytes: code.as_bytes().to_vec(),
    });
}

/// Extracts object code previously attached by
/// [`attach_precompiled_object`].
pub fn extract_precompiled_object(module: &Module) -> Result<ObjectCode, CompileError> {
    module
        .custom_sections
        .iter()
        .find(|section| section.name == PRECOMPILED_OBJECT_SECTION)
        .map(|section| ObjectCode::from_bytes(section.bytes.clone()))
        .ok_or(CompileError::MissingPrecompiledObject)
}
