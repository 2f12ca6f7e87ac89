use super::compartment::{Compartment, CompartmentInner};
use super::context::ContextRuntimeData;
use super::exception::Exception;
use super::value::Value;
use crate::collections::HashMap;
use crate::compile::FunctionThunk;
use crate::indices::InstanceId;
use crate::types::FunctionType;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use smallvec::SmallVec;

/// A host-implemented function body.
pub type IntrinsicFn = Arc<
    dyn Fn(&mut ContextRuntimeData, &[Value]) -> Result<SmallVec<[Value; 2]>, Exception>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub(crate) enum FunctionBody {
    /// An entry into loaded object code.
    Thunk(FunctionThunk),
    /// A host intrinsic.
    Intrinsic(IntrinsicFn),
}

/// The mutable block shared between a function and root references to it.
///
/// Functions are not independently garbage-collected: rooting a function
/// transitively roots its owning instance, so the root counter lives here
/// rather than in an object header.
#[derive(Default)]
pub(crate) struct FunctionMutableData {
    pub root_count: AtomicUsize,
}

pub(crate) struct FunctionData {
    pub ty: FunctionType,
    pub body: FunctionBody,
    pub mutable_data: Arc<FunctionMutableData>,
    /// The instance this function belongs to; `None` for intrinsics.
    pub instance: Option<InstanceId>,
    pub debug_name: String,
}

/// A non-rooting reference to a function, as stored in tables, globals and
/// values. Reachability through one of those keeps the owning instance
/// alive across garbage collection; a bare `FuncRef` held by the host does
/// not.
#[derive(Clone)]
pub struct FuncRef(pub(crate) Arc<FunctionData>);

impl FuncRef {
    pub fn ty(&self) -> FunctionType {
        self.0.ty
    }

    pub fn debug_name(&self) -> &str {
        &self.0.debug_name
    }
}

impl PartialEq for FuncRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for FuncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncRef({})", self.0.debug_name)
    }
}

/// A root reference to a function. Holding one keeps the function's owning
/// instance (and therefore its compartment's objects) alive.
pub struct Function {
    pub(crate) compartment: Option<Arc<CompartmentInner>>,
    pub(crate) data: Arc<FunctionData>,
}

impl Function {
    pub(crate) fn root(
        compartment: Option<Arc<CompartmentInner>>,
        data: Arc<FunctionData>,
    ) -> Self {
        data.mutable_data.root_count.fetch_add(1, Ordering::AcqRel);
        Self { compartment, data }
    }

    /// Roots a bare function reference from `compartment`.
    pub fn from_func_ref(compartment: &Compartment, func_ref: &FuncRef) -> Self {
        Self::root(Some(compartment.inner.clone()), func_ref.0.clone())
    }

    /// A non-rooting reference to the same function.
    pub fn as_func_ref(&self) -> FuncRef {
        FuncRef(self.data.clone())
    }

    pub fn ty(&self) -> FunctionType {
        self.data.ty
    }

    pub fn debug_name(&self) -> &str {
        &self.data.debug_name
    }

    /// Whether this function is a host intrinsic rather than compiled code.
    pub fn is_intrinsic(&self) -> bool {
        matches!(self.data.body, FunctionBody::Intrinsic(_))
    }
}

impl Clone for Function {
    fn clone(&self) -> Self {
        Self::root(self.compartment.clone(), self.data.clone())
    }
}

impl Drop for Function {
    fn drop(&mut self) {
        self.data
            .mutable_data
            .root_count
            .fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({}: {})", self.data.debug_name, self.data.ty)
    }
}

/// The pointer-identity remap table used by compartment cloning to rewrite
/// function references to the cloned instances' functions.
#[derive(Default)]
pub(crate) struct FunctionRemap {
    map: HashMap<usize, Arc<FunctionData>>,
}

impl FunctionRemap {
    fn key(data: &Arc<FunctionData>) -> usize {
        Arc::as_ptr(data) as usize
    }

    /// Registers a clone of `data` if it belongs to an instance; intrinsic
    /// functions stay shared between the compartments.
    pub fn add_clone(&mut self, data: &Arc<FunctionData>) {
        if data.instance.is_none() {
            return;
        }
        let key = Self::key(data);
        if self.map.contains_key(&key) {
            return;
        }
        let clone = Arc::new(FunctionData {
            ty: data.ty,
            body: data.body.clone(),
            mutable_data: Arc::new(FunctionMutableData::default()),
            instance: data.instance,
            debug_name: data.debug_name.clone(),
        });
        self.map.add(key, clone);
    }

    pub fn remap(&self, data: &Arc<FunctionData>) -> Arc<FunctionData> {
        self.map
            .get(&Self::key(data))
            .cloned()
            .unwrap_or_else(|| data.clone())
    }

    pub fn remap_value(&self, value: &Value) -> Value {
        match value {
            Value::FuncRef(Some(func_ref)) => {
                Value::FuncRef(Some(FuncRef(self.remap(&func_ref.0))))
            }
            other => other.clone(),
        }
    }
}
