//! The runtime object model: compartments, contexts, the nine object kinds,
//! the tracing garbage collector, linking, instantiation, and the
//! invocation ABI.

mod compartment;
mod context;
mod exception;
mod function;
mod gc;
mod global;
mod instance;
mod intrinsics;
mod linker;
mod memory;
mod mmap;
mod object;
mod table;
mod value;

pub use compartment::{clone_compartment, create_compartment, Compartment};
pub use context::{clone_context, create_context, Context, ContextRuntimeData};
pub use exception::{
    catch_runtime_exceptions, dispatch_unhandled_exception, set_unhandled_exception_handler,
    throw_exception, Exception, ExceptionTypeRef,
};
pub use function::{Function, FuncRef, IntrinsicFn};
pub use gc::{collect_compartment_garbage, try_collect_compartment};
pub use global::Global;
pub use instance::{instantiate_module, Instance};
pub use intrinsics::{IntrinsicExport, IntrinsicModule};
pub use linker::{
    link_module, IntrinsicResolver, LazyResolver, ModuleExportResolver, NullResolver, Resolver,
};
pub use memory::{Memory, WaitResult};
pub use table::Table;
pub use value::{ExternRef, UntaggedValue, Value};

mod invoke;
pub use invoke::{invoke_function_checked, invoke_function_unchecked};

use crate::types::ExternType;

/// A runtime object of any importable/exportable kind, or an instance.
#[derive(Debug, Clone)]
pub enum Object {
    Function(Function),
    Table(Table),
    Memory(Memory),
    Global(Global),
    Tag(crate::runtime::exception::Tag),
    Instance(Instance),
}

pub use exception::Tag;

impl Object {
    /// The type used for import matching; `None` for instances.
    pub fn extern_type(&self) -> Option<ExternType> {
        Some(match self {
            Object::Function(f) => ExternType::Function(f.ty()),
            Object::Table(t) => ExternType::Table(t.ty()),
            Object::Memory(m) => ExternType::Memory(m.ty()),
            Object::Global(g) => ExternType::Global(g.ty()),
            Object::Tag(t) => ExternType::Tag(t.ty()),
            Object::Instance(_) => return None,
        })
    }
}
