use super::compartment::{define_gc_handle, Compartment, CompartmentInner};
use super::function::FunctionRemap;
use super::object::ObjectHeader;
use super::value::{UntaggedValue, Value};
use crate::indices::ContextId;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub(crate) struct ContextObject {
    pub header: ObjectHeader,
    /// This context's snapshot of every mutable global cell in the
    /// compartment.
    pub mutable_globals: Vec<Value>,
    /// Scratch buffer used by the invocation ABI for argument and result
    /// marshalling.
    pub scratch: Vec<UntaggedValue>,
}

impl ContextObject {
    pub fn deep_clone(&self, remap: &FunctionRemap) -> ContextObject {
        ContextObject {
            header: ObjectHeader::new(self.header.debug_name.lock().clone()),
            mutable_globals: self
                .mutable_globals
                .iter()
                .map(|value| remap.remap_value(value))
                .collect(),
            scratch: Vec::new(),
        }
    }
}

define_gc_handle!(
    /// Execution-local state inside a compartment: a thread-local snapshot
    /// of mutable globals and the argument-marshalling scratch buffer.
    ///
    /// The enclosing compartment is kept alive for the context's whole
    /// lifetime.
    Context,
    ContextId,
    contexts,
    ContextObject
);

impl Context {
    /// The pointer-sized token compiled code receives as its hidden first
    /// argument.
    pub fn runtime_data(&self) -> ContextRuntimeData {
        ContextRuntimeData {
            compartment: self.compartment.clone(),
            context_id: self.id,
        }
    }
}

/// What compiled code (and host intrinsics) receive to reach the
/// compartment's memories, tables and mutable globals during a call.
#[derive(Clone)]
pub struct ContextRuntimeData {
    pub(crate) compartment: Arc<CompartmentInner>,
    pub(crate) context_id: ContextId,
}

impl ContextRuntimeData {
    /// A root reference to the enclosing compartment.
    pub fn compartment(&self) -> Compartment {
        Compartment::from_inner(self.compartment.clone())
    }

    /// A root reference to the context itself.
    pub fn context(&self) -> Context {
        Context::from_id(self.compartment.clone(), self.context_id)
    }
}

/// Creates a context whose mutable-global cells are seeded from the
/// compartment's current initial values.
pub fn create_context(compartment: &Compartment) -> Context {
    let id = {
        let mut state = compartment.inner.state.write();
        let cells = state.initial_global_values.clone();
        state.contexts.alloc(ContextObject {
            header: ObjectHeader::new("context"),
            mutable_globals: cells,
            scratch: Vec::new(),
        })
    };
    Context::from_id(compartment.inner.clone(), id)
}

/// Creates a context in `compartment` carrying the same mutable-global
/// snapshot as `src`.
pub fn clone_context(src: &Context, compartment: &Compartment) -> Context {
    let cells = src.with_object(|object| object.mutable_globals.clone());
    let id = {
        let mut state = compartment.inner.state.write();
        state.contexts.alloc(ContextObject {
            header: ObjectHeader::new("context"),
            mutable_globals: cells,
            scratch: Vec::new(),
        })
    };
    Context::from_id(compartment.inner.clone(), id)
}
