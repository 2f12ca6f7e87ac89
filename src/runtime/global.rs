use super::compartment::{define_gc_handle, Compartment};
use super::context::ContextRuntimeData;
use super::function::FunctionRemap;
use super::object::ObjectHeader;
use super::value::Value;
use crate::indices::GlobalId;
use crate::types::{GlobalType, ValueType};
use crate::Trap;

pub(crate) struct GlobalObject {
    pub header: ObjectHeader,
    pub ty: GlobalType,
    /// The value of an immutable global, and the template for the cells of
    /// newly created contexts.
    pub initial_value: Value,
    /// For mutable globals, the index of this global's cell in every
    /// context's snapshot.
    pub cell: Option<usize>,
}

impl GlobalObject {
    pub fn deep_clone(&self, remap: &FunctionRemap) -> GlobalObject {
        GlobalObject {
            header: ObjectHeader::new(self.header.debug_name.lock().clone()),
            ty: self.ty,
            initial_value: remap.remap_value(&self.initial_value),
            cell: self.cell,
        }
    }
}

define_gc_handle!(
    /// A root reference to a global variable.
    ///
    /// Immutable globals hold one value; mutable globals hold one cell per
    /// context, so reads and writes go through a [`ContextRuntimeData`].
    Global,
    GlobalId,
    globals,
    GlobalObject
);

impl Global {
    /// Creates a global in `compartment` holding `initial`; returns `None`
    /// if the initial value does not match the type.
    pub fn new(compartment: &Compartment, ty: GlobalType, initial: Value) -> Option<Global> {
        if !ValueType::is_subtype(initial.type_of(), ty.value_type) {
            return None;
        }
        let id = {
            let mut state = compartment.inner.state.write();
            let cell = if ty.is_mutable {
                let cell = state.num_mutable_global_cells;
                state.num_mutable_global_cells += 1;
                state.initial_global_values.push(initial.clone());
                // Existing contexts get the new cell seeded too.
                let mut context_ids = alloc::vec::Vec::new();
                for (id, _) in state.contexts.iter() {
                    context_ids.push(id);
                }
                for id in context_ids {
                    let value = initial.clone();
                    if let Some(context) = state.contexts.get_mut(id) {
                        context.mutable_globals.push(value);
                    }
                }
                Some(cell)
            } else {
                None
            };
            state.globals.alloc(GlobalObject {
                header: ObjectHeader::new("global"),
                ty,
                initial_value: initial,
                cell,
            })
        };
        Some(Global::from_id(compartment.inner.clone(), id))
    }

    pub fn ty(&self) -> GlobalType {
        self.with_object(|object| object.ty)
    }

    /// Reads the global's value: the context's cell for mutable globals,
    /// the initial value otherwise.
    pub fn get(&self, ctx: &ContextRuntimeData) -> Value {
        let cell = self.with_object(|object| object.cell);
        match cell {
            None => self.with_object(|object| object.initial_value.clone()),
            Some(cell) => {
                let state = self.compartment.state.read();
                state
                    .contexts
                    .get(ctx.context_id)
                    .and_then(|context| context.mutable_globals.get(cell).cloned())
                    .expect("context is missing a mutable-global cell")
            }
        }
    }

    /// Writes a mutable global's cell in `ctx`.
    pub fn set(&self, ctx: &ContextRuntimeData, value: Value) -> Result<(), Trap> {
        let (ty, cell) = self.with_object(|object| (object.ty, object.cell));
        if !ty.is_mutable {
            return Err(Trap::InvalidArgument);
        }
        if !ValueType::is_subtype(value.type_of(), ty.value_type) {
            return Err(Trap::InvalidArgument);
        }
        let cell = cell.expect("mutable global without a cell");
        let mut state = self.compartment.state.write();
        let slot = state
            .contexts
            .get_mut(ctx.context_id)
            .and_then(|context| context.mutable_globals.get_mut(cell))
            .ok_or(Trap::InvalidArgument)?;
        *slot = value;
        Ok(())
    }
}
