use super::compartment::{Compartment, CompartmentState};
use super::context::ContextObject;
use super::exception::TagObject;
use super::global::GlobalObject;
use super::instance::InstanceObject;
use super::memory::MemoryObject;
use super::table::TableObject;
use super::value::Value;
use crate::collections::HashSet;
use crate::indices::{ContextId, GlobalId, InstanceId, MemoryId, TableId, TagId};
use alloc::vec::Vec;
use core::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ObjKey {
    Memory(MemoryId),
    Table(TableId),
    Global(GlobalId),
    Tag(TagId),
    Instance(InstanceId),
    Context(ContextId),
}

/// Objects removed from the compartment during the sweep; dropped only
/// after the compartment lock is released.
enum DeadObject {
    Memory(MemoryObject),
    Table(TableObject),
    Global(GlobalObject),
    Tag(TagObject),
    Instance(InstanceObject),
    Context(ContextObject),
}

fn value_child(value: &Value) -> Option<ObjKey> {
    match value {
        Value::FuncRef(Some(func_ref)) => func_ref.0.instance.map(ObjKey::Instance),
        _ => None,
    }
}

fn children(state: &CompartmentState, key: ObjKey, visit: &mut impl FnMut(ObjKey)) {
    match key {
        ObjKey::Memory(_) | ObjKey::Tag(_) => {}
        ObjKey::Table(id) => {
            if let Some(table) = state.tables.get(id) {
                for element in &table.elements {
                    if let Some(child) = value_child(element) {
                        visit(child);
                    }
                }
            }
        }
        ObjKey::Global(id) => {
            if let Some(global) = state.globals.get(id) {
                if let Some(child) = value_child(&global.initial_value) {
                    visit(child);
                }
                // A mutable global's value lives in one cell per context:
                // visit every context's live value at this global's cell,
                // plus the template used to seed future contexts.
                if let Some(cell) = global.cell {
                    if let Some(template) = state.initial_global_values.get(cell) {
                        if let Some(child) = value_child(template) {
                            visit(child);
                        }
                    }
                    for (_, context) in state.contexts.iter() {
                        if let Some(value) = context.mutable_globals.get(cell) {
                            if let Some(child) = value_child(value) {
                                visit(child);
                            }
                        }
                    }
                }
            }
        }
        ObjKey::Context(id) => {
            if let Some(context) = state.contexts.get(id) {
                for value in &context.mutable_globals {
                    if let Some(child) = value_child(value) {
                        visit(child);
                    }
                }
            }
        }
        ObjKey::Instance(id) => {
            if let Some(instance) = state.instances.get(id) {
                for function in &instance.functions {
                    if let Some(owner) = function.instance {
                        visit(ObjKey::Instance(owner));
                    }
                }
                for id in &instance.tables {
                    visit(ObjKey::Table(*id));
                }
                for id in &instance.memories {
                    visit(ObjKey::Memory(*id));
                }
                for id in &instance.globals {
                    visit(ObjKey::Global(*id));
                }
                for id in &instance.tags {
                    visit(ObjKey::Tag(*id));
                }
                for elems in &instance.passive_elems {
                    for value in elems {
                        if let Some(child) = value_child(value) {
                            visit(child);
                        }
                    }
                }
            }
        }
    }
}

/// Collects the compartment's unreachable objects.
///
/// The initial root set is every object with a nonzero root counter;
/// instances additionally count a root for each of their functions with a
/// rooted reference. Reachability is traced through tables' elements,
/// globals' reference values, contexts' mutable-global cells, and
/// instances' imported and defined objects; a reachable function
/// transitively reaches its owning instance.
pub fn collect_compartment_garbage(compartment: &Compartment) {
    let mut dead = Vec::new();
    {
        let mut state = compartment.inner.state.write();

        let mut unreferenced: HashSet<ObjKey> = HashSet::new();
        let mut pending_scan: Vec<ObjKey> = Vec::new();

        let mut classify = |key: ObjKey,
                            rooted: bool,
                            unreferenced: &mut HashSet<ObjKey>,
                            pending: &mut Vec<ObjKey>| {
            if rooted {
                pending.push(key);
            } else {
                unreferenced.add(key);
            }
        };

        for (id, object) in state.memories.iter() {
            let rooted = object.header.root_count.load(Ordering::Acquire) > 0;
            classify(ObjKey::Memory(id), rooted, &mut unreferenced, &mut pending_scan);
        }
        for (id, object) in state.tables.iter() {
            let rooted = object.header.root_count.load(Ordering::Acquire) > 0;
            classify(ObjKey::Table(id), rooted, &mut unreferenced, &mut pending_scan);
        }
        for (id, object) in state.globals.iter() {
            let rooted = object.header.root_count.load(Ordering::Acquire) > 0;
            classify(ObjKey::Global(id), rooted, &mut unreferenced, &mut pending_scan);
        }
        for (id, object) in state.tags.iter() {
            let rooted = object.header.root_count.load(Ordering::Acquire) > 0;
            classify(ObjKey::Tag(id), rooted, &mut unreferenced, &mut pending_scan);
        }
        for (id, object) in state.contexts.iter() {
            let rooted = object.header.root_count.load(Ordering::Acquire) > 0;
            classify(ObjKey::Context(id), rooted, &mut unreferenced, &mut pending_scan);
        }
        for (id, object) in state.instances.iter() {
            let rooted = object.header.root_count.load(Ordering::Acquire) > 0
                || object.functions.iter().any(|function| {
                    function.instance == Some(id)
                        && function.mutable_data.root_count.load(Ordering::Acquire) > 0
                });
            classify(ObjKey::Instance(id), rooted, &mut unreferenced, &mut pending_scan);
        }

        while let Some(key) = pending_scan.pop() {
            children(&state, key, &mut |child| {
                if unreferenced.remove(&child) {
                    pending_scan.push(child);
                }
            });
        }

        let mut num_collected = 0usize;
        for key in unreferenced.iter() {
            let object = match *key {
                ObjKey::Memory(id) => state.memories.dealloc(id).map(DeadObject::Memory),
                ObjKey::Table(id) => state.tables.dealloc(id).map(DeadObject::Table),
                ObjKey::Global(id) => state.globals.dealloc(id).map(DeadObject::Global),
                ObjKey::Tag(id) => state.tags.dealloc(id).map(DeadObject::Tag),
                ObjKey::Instance(id) => state.instances.dealloc(id).map(DeadObject::Instance),
                ObjKey::Context(id) => state.contexts.dealloc(id).map(DeadObject::Context),
            };
            if let Some(object) = object {
                num_collected += 1;
                dead.push(object);
            }
        }
        tracing::debug!("collected {num_collected} unreachable object(s)");
    }
    // The compartment lock is released before the objects drop.
    drop(dead);
}

/// Takes ownership of a compartment root, collects garbage, and reports
/// whether the compartment itself was collected: it is destroyed when the
/// passed handle was the last root and no objects remain.
pub fn try_collect_compartment(compartment: Compartment) -> bool {
    collect_compartment_garbage(&compartment);
    let collectable = {
        let state = compartment.inner.state.read();
        state.is_object_free()
            && compartment
                .inner
                .header
                .root_count
                .load(Ordering::Acquire)
                == 1
    };
    drop(compartment);
    collectable
}
