use super::context::ContextObject;
use super::exception::TagObject;
use super::function::{FunctionData, FunctionRemap};
use super::global::GlobalObject;
use super::instance::InstanceObject;
use super::memory::MemoryObject;
use super::object::ObjectHeader;
use super::table::TableObject;
use super::value::Value;
use crate::indices::{ContextId, GlobalId, InstanceId, MemoryId, TableId, TagId};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use cranelift_entity::{EntityRef, PrimaryMap};
use spin::RwLock;

/// A vector of objects with stable ids and a free list. Ids (including the
/// holes left by collected objects) are preserved by compartment cloning.
pub(crate) struct ObjectSpace<I: EntityRef, T> {
    map: PrimaryMap<I, Option<T>>,
    free: Vec<I>,
}

impl<I: EntityRef, T> Default for ObjectSpace<I, T> {
    fn default() -> Self {
        Self {
            map: PrimaryMap::new(),
            free: Vec::new(),
        }
    }
}

impl<I: EntityRef, T> ObjectSpace<I, T> {
    pub fn alloc(&mut self, object: T) -> I {
        if let Some(id) = self.free.pop() {
            self.map[id] = Some(object);
            id
        } else {
            self.map.push(Some(object))
        }
    }

    pub fn dealloc(&mut self, id: I) -> Option<T> {
        let object = self.map.get_mut(id)?.take();
        if object.is_some() {
            self.free.push(id);
        }
        object
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.map.get(id)?.as_ref()
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.map.get_mut(id)?.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.map
            .iter()
            .filter_map(|(id, slot)| slot.as_ref().map(|object| (id, object)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Clones the space, preserving ids and holes, mapping each live object
    /// through `f`.
    pub fn map_clone(&self, mut f: impl FnMut(I, &T) -> T) -> ObjectSpace<I, T> {
        let mut map = PrimaryMap::with_capacity(self.map.len());
        for (id, slot) in self.map.iter() {
            map.push(slot.as_ref().map(|object| f(id, object)));
        }
        ObjectSpace {
            map,
            free: self.free.clone(),
        }
    }
}

pub(crate) struct CompartmentState {
    pub memories: ObjectSpace<MemoryId, MemoryObject>,
    pub tables: ObjectSpace<TableId, TableObject>,
    pub globals: ObjectSpace<GlobalId, GlobalObject>,
    pub tags: ObjectSpace<TagId, TagObject>,
    pub instances: ObjectSpace<InstanceId, InstanceObject>,
    pub contexts: ObjectSpace<ContextId, ContextObject>,

    /// One cell per mutable global ever created in this compartment; each
    /// context carries a thread-local snapshot of these.
    pub num_mutable_global_cells: usize,
    /// Template values used to seed the cells of newly created contexts.
    pub initial_global_values: Vec<Value>,
}

impl CompartmentState {
    fn new() -> Self {
        Self {
            memories: ObjectSpace::default(),
            tables: ObjectSpace::default(),
            globals: ObjectSpace::default(),
            tags: ObjectSpace::default(),
            instances: ObjectSpace::default(),
            contexts: ObjectSpace::default(),
            num_mutable_global_cells: 0,
            initial_global_values: Vec::new(),
        }
    }

    pub fn is_object_free(&self) -> bool {
        self.memories.is_empty()
            && self.tables.is_empty()
            && self.globals.is_empty()
            && self.tags.is_empty()
            && self.instances.is_empty()
            && self.contexts.is_empty()
    }
}

pub(crate) struct CompartmentInner {
    pub header: ObjectHeader,
    /// One coarse lock guards object creation/destruction and the id
    /// vectors; memories additionally carry their own finer lock.
    pub state: RwLock<CompartmentState>,
}

impl CompartmentInner {
    fn new() -> Self {
        Self {
            header: ObjectHeader::new("compartment"),
            state: RwLock::new(CompartmentState::new()),
        }
    }
}

/// A root reference to an isolation domain.
///
/// `Clone` produces another root reference to the *same* compartment; use
/// [`clone_compartment`] to duplicate the object graph.
pub struct Compartment {
    pub(crate) inner: Arc<CompartmentInner>,
}

impl Compartment {
    pub fn new() -> Self {
        create_compartment()
    }

    pub(crate) fn from_inner(inner: Arc<CompartmentInner>) -> Self {
        inner.header.root_count.fetch_add(1, Ordering::AcqRel);
        Self { inner }
    }

    pub fn set_debug_name(&self, name: &str) {
        *self.inner.header.debug_name.lock() = name.into();
    }

    pub fn debug_name(&self) -> alloc::string::String {
        self.inner.header.debug_name.lock().clone()
    }

    pub(crate) fn same_compartment(&self, other: &Arc<CompartmentInner>) -> bool {
        Arc::ptr_eq(&self.inner, other)
    }
}

impl Default for Compartment {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Compartment {
    fn clone(&self) -> Self {
        Self::from_inner(self.inner.clone())
    }
}

impl Drop for Compartment {
    fn drop(&mut self) {
        self.inner.header.root_count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Creates a fresh isolation domain.
pub fn create_compartment() -> Compartment {
    Compartment::from_inner(Arc::new(CompartmentInner::new()))
}

/// Duplicates a compartment's object graph: the clone holds structurally
/// identical instances, tables, memories, globals and contexts at the same
/// ids, with memory contents bit-identical at this instant. Internal
/// references are rewritten to point at the cloned objects; mutation is
/// independent afterwards.
pub fn clone_compartment(src: &Compartment) -> Compartment {
    let src_state = src.inner.state.read();
    let dst = create_compartment();

    // First pass: clone every compartment-owned function so references can
    // be rewritten. Intrinsic functions have no owning instance and stay
    // shared.
    let mut remap = FunctionRemap::default();
    for (_, instance) in src_state.instances.iter() {
        for function in &instance.functions {
            remap.add_clone(function);
        }
    }

    {
        let mut dst_state = dst.inner.state.write();
        dst_state.instances = src_state
            .instances
            .map_clone(|_, instance| instance.deep_clone(&remap));
        dst_state.memories = src_state
            .memories
            .map_clone(|_, memory| memory.deep_clone());
        dst_state.tables = src_state
            .tables
            .map_clone(|_, table| table.deep_clone(&remap));
        dst_state.globals = src_state
            .globals
            .map_clone(|_, global| global.deep_clone(&remap));
        dst_state.tags = src_state.tags.map_clone(|_, tag| tag.deep_clone());
        dst_state.contexts = src_state
            .contexts
            .map_clone(|_, context| context.deep_clone(&remap));
        dst_state.num_mutable_global_cells = src_state.num_mutable_global_cells;
        dst_state.initial_global_values = src_state
            .initial_global_values
            .iter()
            .map(|value| remap.remap_value(value))
            .collect();
    }

    tracing::debug!("cloned compartment {:?}", src.debug_name());
    dst
}

pub(crate) use handle_macro::define_gc_handle;

mod handle_macro {
    /// Defines a root-reference handle over one of the compartment's object
    /// spaces: construction, cloning and assignment increment the target's
    /// root counter, dropping decrements it.
    macro_rules! define_gc_handle {
        ($(#[$doc:meta])* $Handle:ident, $Id:ty, $field:ident, $Obj:ty) => {
            $(#[$doc])*
            pub struct $Handle {
                pub(crate) compartment:
                    alloc::sync::Arc<crate::runtime::compartment::CompartmentInner>,
                pub(crate) id: $Id,
            }

            impl $Handle {
                pub(crate) fn from_id(
                    compartment: alloc::sync::Arc<
                        crate::runtime::compartment::CompartmentInner,
                    >,
                    id: $Id,
                ) -> Self {
                    {
                        let state = compartment.state.read();
                        if let Some(object) = state.$field.get(id) {
                            object
                                .header
                                .root_count
                                .fetch_add(1, core::sync::atomic::Ordering::AcqRel);
                        }
                    }
                    Self { compartment, id }
                }

                /// The compartment that owns this object.
                pub fn compartment(&self) -> crate::runtime::Compartment {
                    crate::runtime::Compartment::from_inner(self.compartment.clone())
                }

                /// Resolves this object's counterpart in a compartment
                /// produced by [`crate::runtime::clone_compartment`]; ids
                /// are stable across cloning.
                pub fn remap_to_cloned_compartment(
                    &self,
                    compartment: &crate::runtime::Compartment,
                ) -> Option<Self> {
                    compartment.inner.state.read().$field.get(self.id)?;
                    Some(Self::from_id(compartment.inner.clone(), self.id))
                }

                pub fn set_debug_name(&self, name: &str) {
                    self.with_object(|object| {
                        *object.header.debug_name.lock() = name.into();
                    });
                }

                pub fn debug_name(&self) -> alloc::string::String {
                    self.with_object(|object| object.header.debug_name.lock().clone())
                }

                pub(crate) fn with_object<R>(&self, f: impl FnOnce(&$Obj) -> R) -> R {
                    let state = self.compartment.state.read();
                    f(state
                        .$field
                        .get(self.id)
                        .expect("object was collected while rooted"))
                }

                pub(crate) fn with_object_mut<R>(&self, f: impl FnOnce(&mut $Obj) -> R) -> R {
                    let mut state = self.compartment.state.write();
                    f(state
                        .$field
                        .get_mut(self.id)
                        .expect("object was collected while rooted"))
                }
            }

            impl Clone for $Handle {
                fn clone(&self) -> Self {
                    Self::from_id(self.compartment.clone(), self.id)
                }
            }

            impl core::fmt::Debug for $Handle {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    write!(f, "{}({})", stringify!($Handle), self.debug_name())
                }
            }

            impl Drop for $Handle {
                fn drop(&mut self) {
                    let state = self.compartment.state.read();
                    if let Some(object) = state.$field.get(self.id) {
                        object
                            .header
                            .root_count
                            .fetch_sub(1, core::sync::atomic::Ordering::AcqRel);
                    }
                }
            }
        };
    }
    pub(crate) use define_gc_handle;
}
