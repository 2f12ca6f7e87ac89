use super::compartment::{define_gc_handle, Compartment};
use super::context::Context;
use super::exception::{Exception, Tag};
use super::function::{Function, FunctionData, FunctionMutableData, FunctionRemap};
use super::global::{Global, GlobalObject};
use super::invoke::invoke_function_checked;
use super::memory::{Memory, MemoryObject};
use super::object::ObjectHeader;
use super::table::{Table, TableObject};
use super::value::Value;
use super::Object;
use crate::collections::HashMap;
use crate::compile::CompiledModule;
use crate::errors::{Error, LinkError, MissingImport};
use crate::indices::{
    EntityIndex, GlobalId, InstanceId, MemoryId, TableId, TagId,
};
use crate::ir::{
    ConstExpr, DataSegmentKind, ElemContents, ElemExpr, ElemSegmentKind, Module,
};
use crate::runtime::exception::TagObject;
use crate::types::{ExternType, ReferenceType};
use crate::Trap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// A non-rooting reference from an instance to one of its objects.
#[derive(Clone)]
pub(crate) enum InternalRef {
    Function(Arc<FunctionData>),
    Table(TableId),
    Memory(MemoryId),
    Global(GlobalId),
    Tag(TagId),
}

pub(crate) struct InstanceObject {
    pub header: ObjectHeader,
    pub module: Option<Arc<Module>>,

    /// Full index spaces in declaration order: imported entries first.
    pub functions: Vec<Arc<FunctionData>>,
    pub tables: Vec<TableId>,
    pub memories: Vec<MemoryId>,
    pub globals: Vec<GlobalId>,
    pub tags: Vec<TagId>,

    pub exports: HashMap<String, InternalRef>,

    /// Passive segment payloads kept for `memory.init`/`table.init`.
    pub passive_data: Vec<Arc<[u8]>>,
    pub passive_elems: Vec<Vec<Value>>,
}

impl InstanceObject {
    pub fn deep_clone(&self, remap: &FunctionRemap) -> InstanceObject {
        let mut exports = HashMap::new();
        for (name, entry) in self.exports.iter() {
            let entry = match entry {
                InternalRef::Function(f) => InternalRef::Function(remap.remap(f)),
                other => other.clone(),
            };
            exports.set(name.clone(), entry);
        }
        InstanceObject {
            header: ObjectHeader::new(self.header.debug_name.lock().clone()),
            module: self.module.clone(),
            functions: self.functions.iter().map(|f| remap.remap(f)).collect(),
            tables: self.tables.clone(),
            memories: self.memories.clone(),
            globals: self.globals.clone(),
            tags: self.tags.clone(),
            exports,
            passive_data: self.passive_data.clone(),
            passive_elems: self
                .passive_elems
                .iter()
                .map(|elems| elems.iter().map(|v| remap.remap_value(v)).collect())
                .collect(),
        }
    }
}

define_gc_handle!(
    /// A root reference to an instantiated module.
    Instance,
    InstanceId,
    instances,
    InstanceObject
);

impl Instance {
    /// Looks up an export by name, returning a rooted handle.
    pub fn export(&self, name: &str) -> Option<Object> {
        let entry = self.with_object(|object| object.exports.get(name).cloned())?;
        Some(match entry {
            InternalRef::Function(data) => {
                Object::Function(Function::root(Some(self.compartment.clone()), data))
            }
            InternalRef::Table(id) => {
                Object::Table(Table::from_id(self.compartment.clone(), id))
            }
            InternalRef::Memory(id) => {
                Object::Memory(Memory::from_id(self.compartment.clone(), id))
            }
            InternalRef::Global(id) => {
                Object::Global(Global::from_id(self.compartment.clone(), id))
            }
            InternalRef::Tag(id) => Object::Tag(Tag::from_id(self.compartment.clone(), id)),
        })
    }

    /// Looks up an exported function by name.
    pub fn exported_function(&self, name: &str) -> Option<Function> {
        match self.export(name)? {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn function_by_index(&self, index: u32) -> Option<Function> {
        let data = self.with_object(|object| object.functions.get(index as usize).cloned())?;
        Some(Function::root(Some(self.compartment.clone()), data))
    }
}

/// Evaluates an initializer expression against an instance's index spaces.
fn eval_const_expr(
    compartment: &Compartment,
    instance: &Instance,
    expr: &ConstExpr,
) -> Result<Value, Exception> {
    Ok(match expr {
        ConstExpr::I32Const(value) => Value::I32(*value),
        ConstExpr::I64Const(value) => Value::I64(*value),
        ConstExpr::F32Const(bits) => Value::F32(*bits),
        ConstExpr::F64Const(bits) => Value::F64(*bits),
        ConstExpr::V128Const(value) => Value::V128(*value),
        ConstExpr::RefNull(ReferenceType::FuncRef) => Value::FuncRef(None),
        ConstExpr::RefNull(ReferenceType::ExternRef) => Value::ExternRef(None),
        ConstExpr::RefFunc(index) => {
            let function = instance
                .function_by_index(index.as_u32())
                .ok_or_else(|| Exception::trap(Trap::InvalidArgument))?;
            Value::FuncRef(Some(function.as_func_ref()))
        }
        ConstExpr::GlobalGet(index) => {
            // Validation restricts this to imported, immutable globals, so
            // the value is the global's initial value.
            let id = instance
                .with_object(|object| object.globals.get(index.as_u32() as usize).copied())
                .ok_or_else(|| Exception::trap(Trap::InvalidArgument))?;
            let state = compartment.inner.state.read();
            let global = state
                .globals
                .get(id)
                .ok_or_else(|| Exception::trap(Trap::InvalidArgument))?;
            global.initial_value.clone()
        }
    })
}

fn missing_import(module: &Module, entity: EntityIndex) -> LinkError {
    let (module_name, name, ty) = module
        .import_info(entity)
        .expect("import entry out of range");
    LinkError {
        missing: alloc::vec![MissingImport {
            module: module_name.into(),
            name: name.into(),
            ty,
        }],
    }
}

/// Instantiates a compiled module inside `context`'s compartment.
///
/// `imports` must resolve the module's imports in declaration order (as
/// produced by [`crate::runtime::link_module`]). Instantiation allocates
/// the defined objects, runs the active element and data segments (which
/// trap on out-of-bounds ranges), and finally calls the start function.
pub fn instantiate_module(
    context: &Context,
    compiled: &CompiledModule,
    imports: &[Object],
    debug_name: &str,
) -> Result<Instance, Error> {
    let compartment = context.compartment();
    let module = &compiled.module;

    if imports.len() != module.imports.len()
        || compiled.loaded.thunks.len() != module.functions.defs.len()
    {
        return Err(Error::Runtime(Exception::trap(Trap::InvalidArgument)));
    }

    // Check the import bindings against the declared types, and that every
    // bound object lives in the target compartment.
    let mut functions: Vec<Arc<FunctionData>> = Vec::new();
    let mut tables: Vec<TableId> = Vec::new();
    let mut memories: Vec<MemoryId> = Vec::new();
    let mut globals: Vec<GlobalId> = Vec::new();
    let mut tags: Vec<TagId> = Vec::new();

    for (entity, object) in module.imports.iter().zip(imports) {
        let (_, _, expected) = module.import_info(*entity).expect("import out of range");
        let actual = object
            .extern_type()
            .ok_or_else(|| Error::Runtime(Exception::trap(Trap::InvalidArgument)))?;
        if !ExternType::is_subtype(&actual, &expected) {
            return Err(missing_import(module, *entity).into());
        }
        match object {
            Object::Function(f) => {
                if let Some(c) = &f.compartment {
                    if !compartment.same_compartment(c) {
                        return Err(Error::Runtime(Exception::trap(Trap::InvalidArgument)));
                    }
                }
                functions.push(f.data.clone());
            }
            Object::Table(t) => {
                if !compartment.same_compartment(&t.compartment) {
                    return Err(Error::Runtime(Exception::trap(Trap::InvalidArgument)));
                }
                tables.push(t.id);
            }
            Object::Memory(m) => {
                if !compartment.same_compartment(&m.compartment) {
                    return Err(Error::Runtime(Exception::trap(Trap::InvalidArgument)));
                }
                memories.push(m.id);
            }
            Object::Global(g) => {
                if !compartment.same_compartment(&g.compartment) {
                    return Err(Error::Runtime(Exception::trap(Trap::InvalidArgument)));
                }
                globals.push(g.id);
            }
            Object::Tag(t) => {
                if !compartment.same_compartment(&t.compartment) {
                    return Err(Error::Runtime(Exception::trap(Trap::InvalidArgument)));
                }
                tags.push(t.id);
            }
            Object::Instance(_) => {
                return Err(Error::Runtime(Exception::trap(Trap::InvalidArgument)))
            }
        }
    }

    // Allocate the instance shell first so defined functions can carry its
    // id.
    let instance_id = {
        let mut state = compartment.inner.state.write();
        state.instances.alloc(InstanceObject {
            header: ObjectHeader::new(debug_name),
            module: Some(module.clone()),
            functions: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
            globals: Vec::new(),
            tags: Vec::new(),
            exports: HashMap::new(),
            passive_data: Vec::new(),
            passive_elems: Vec::new(),
        })
    };
    let instance = Instance::from_id(compartment.inner.clone(), instance_id);

    // Defined functions.
    for (def_index, _) in module.functions.defs.iter() {
        let flat = module.functions.flat_index(def_index);
        let ty = module
            .function_type(crate::indices::FuncIndex::from_u32(flat))
            .unwrap();
        let thunk = compiled.loaded.thunks[def_index].clone();
        functions.push(Arc::new(FunctionData {
            ty,
            body: super::function::FunctionBody::Thunk(thunk),
            mutable_data: Arc::new(FunctionMutableData::default()),
            instance: Some(instance_id),
            debug_name: alloc::format!("{debug_name}!f{flat}"),
        }));
    }

    // Defined memories, tables, tags.
    for (_, ty) in module.memories.defs.iter() {
        let object = MemoryObject::new(*ty)
            .ok_or_else(|| Error::Runtime(Exception::trap(Trap::OutOfMemory)))?;
        let mut state = compartment.inner.state.write();
        memories.push(state.memories.alloc(object));
    }
    for (_, ty) in module.tables.defs.iter() {
        let object = TableObject::new(*ty)
            .ok_or_else(|| Error::Runtime(Exception::trap(Trap::OutOfMemory)))?;
        let mut state = compartment.inner.state.write();
        tables.push(state.tables.alloc(object));
    }
    for (_, ty) in module.tags.defs.iter() {
        let mut state = compartment.inner.state.write();
        tags.push(state.tags.alloc(TagObject {
            header: ObjectHeader::new("tag"),
            ty: *ty,
        }));
    }

    // Fill the shell far enough for initializer evaluation (globals may
    // reference imported globals and functions).
    instance.with_object_mut(|object| {
        object.functions = functions.clone();
        object.tables = tables.clone();
        object.memories = memories.clone();
        object.globals = globals.clone();
        object.tags = tags.clone();
    });

    // Defined globals: evaluate initializers, then allocate.
    for (_, def) in module.globals.defs.iter() {
        let initial = eval_const_expr(&compartment, &instance, &def.initializer)
            .map_err(Error::Runtime)?;
        let global = Global::new(&compartment, def.ty, initial)
            .ok_or_else(|| Error::Runtime(Exception::trap(Trap::InvalidArgument)))?;
        globals.push(global.id);
        instance.with_object_mut(|object| object.globals.push(global.id));
    }

    // Exports and passive segments.
    instance.with_object_mut(|object| {
        for export in &module.exports {
            let entry = match export.index {
                EntityIndex::Function(i) => {
                    InternalRef::Function(object.functions[i.as_u32() as usize].clone())
                }
                EntityIndex::Table(i) => InternalRef::Table(object.tables[i.as_u32() as usize]),
                EntityIndex::Memory(i) => {
                    InternalRef::Memory(object.memories[i.as_u32() as usize])
                }
                EntityIndex::Global(i) => {
                    InternalRef::Global(object.globals[i.as_u32() as usize])
                }
                EntityIndex::Tag(i) => InternalRef::Tag(object.tags[i.as_u32() as usize]),
            };
            object.exports.set(export.name.clone(), entry);
        }
    });

    for segment in &module.data_segments {
        if segment.kind == DataSegmentKind::Passive {
            instance.with_object_mut(|object| object.passive_data.push(segment.bytes.clone()));
        }
    }

    // Active element segments.
    for segment in &module.elem_segments {
        let values: Vec<Value> = match &segment.contents {
            ElemContents::Indices { indices, .. } => indices
                .iter()
                .map(|index| {
                    let function = instance
                        .function_by_index(*index)
                        .ok_or_else(|| Exception::trap(Trap::InvalidArgument))?;
                    Ok(Value::FuncRef(Some(function.as_func_ref())))
                })
                .collect::<Result<_, Exception>>()
                .map_err(Error::Runtime)?,
            ElemContents::Expressions { elem_type, exprs } => exprs
                .iter()
                .map(|expr| match expr {
                    ElemExpr::RefNull(_) => Ok(match elem_type {
                        ReferenceType::FuncRef => Value::FuncRef(None),
                        ReferenceType::ExternRef => Value::ExternRef(None),
                    }),
                    ElemExpr::RefFunc(index) => {
                        let function = instance
                            .function_by_index(index.as_u32())
                            .ok_or_else(|| Exception::trap(Trap::InvalidArgument))?;
                        Ok(Value::FuncRef(Some(function.as_func_ref())))
                    }
                })
                .collect::<Result<_, Exception>>()
                .map_err(Error::Runtime)?,
        };

        match &segment.kind {
            ElemSegmentKind::Active {
                table_index,
                offset,
            } => {
                let id = instance
                    .with_object(|object| object.tables.get(table_index.as_u32() as usize).copied())
                    .ok_or_else(|| Error::Runtime(Exception::trap(Trap::InvalidArgument)))?;
                let table = Table::from_id(compartment.inner.clone(), id);
                let base = match eval_const_expr(&compartment, &instance, offset)
                    .map_err(Error::Runtime)?
                {
                    Value::I32(v) => u64::from(u32::from_le_bytes(v.to_le_bytes())),
                    Value::I64(v) => u64::from_le_bytes(v.to_le_bytes()),
                    _ => return Err(Error::Runtime(Exception::trap(Trap::InvalidArgument))),
                };
                let count = u64::try_from(values.len()).unwrap();
                let in_bounds = base
                    .checked_add(count)
                    .map_or(false, |end| end <= table.size());
                if !in_bounds {
                    return Err(Error::Runtime(Exception::trap(
                        Trap::InvalidSegmentOffset,
                    )));
                }
                for (i, value) in values.into_iter().enumerate() {
                    table
                        .set(base + u64::try_from(i).unwrap(), value)
                        .map_err(|trap| Error::Runtime(Exception::trap(trap)))?;
                }
            }
            ElemSegmentKind::Passive => {
                instance.with_object_mut(|object| object.passive_elems.push(values));
            }
            ElemSegmentKind::Declared => {}
        }
    }

    // Active data segments.
    for segment in &module.data_segments {
        let DataSegmentKind::Active {
            memory_index,
            offset,
        } = &segment.kind
        else {
            continue;
        };
        let id = instance
            .with_object(|object| object.memories.get(memory_index.as_u32() as usize).copied())
            .ok_or_else(|| Error::Runtime(Exception::trap(Trap::InvalidArgument)))?;
        let memory = Memory::from_id(compartment.inner.clone(), id);
        let base = match eval_const_expr(&compartment, &instance, offset).map_err(Error::Runtime)? {
            Value::I32(v) => u64::from(u32::from_le_bytes(v.to_le_bytes())),
            Value::I64(v) => u64::from_le_bytes(v.to_le_bytes()),
            _ => return Err(Error::Runtime(Exception::trap(Trap::InvalidArgument))),
        };
        memory.write(base, &segment.bytes).map_err(|_| {
            Error::Runtime(Exception::trap(Trap::InvalidSegmentOffset))
        })?;
    }

    // Start function.
    if let Some(start) = module.start_function {
        let function = instance
            .function_by_index(start.as_u32())
            .ok_or_else(|| Error::Runtime(Exception::trap(Trap::InvalidArgument)))?;
        invoke_function_checked(context, &function, &[]).map_err(Error::Runtime)?;
    }

    tracing::debug!("instantiated {debug_name}");
    Ok(instance)
}

/// Builds an instance directly from host objects; used by intrinsic
/// modules.
pub(crate) fn instance_from_parts(
    compartment: &Compartment,
    debug_name: &str,
    exports: Vec<(String, InternalRef)>,
) -> Instance {
    let mut export_map = HashMap::new();
    let mut functions = Vec::new();
    let mut tables = Vec::new();
    let mut memories = Vec::new();
    let mut globals = Vec::new();
    let mut tags = Vec::new();
    for (name, entry) in exports {
        match &entry {
            InternalRef::Function(f) => functions.push(f.clone()),
            InternalRef::Table(id) => tables.push(*id),
            InternalRef::Memory(id) => memories.push(*id),
            InternalRef::Global(id) => globals.push(*id),
            InternalRef::Tag(id) => tags.push(*id),
        }
        export_map.set(name, entry);
    }
    let id = {
        let mut state = compartment.inner.state.write();
        state.instances.alloc(InstanceObject {
            header: ObjectHeader::new(debug_name),
            module: None,
            functions,
            tables,
            memories,
            globals,
            tags,
            exports: export_map,
            passive_data: Vec::new(),
            passive_elems: Vec::new(),
        })
    };
    Instance::from_id(compartment.inner.clone(), id)
}
