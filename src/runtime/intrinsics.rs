use super::compartment::Compartment;
use super::exception::{Exception, TagObject};
use super::function::{FunctionBody, FunctionData, FunctionMutableData, IntrinsicFn};
use super::global::Global;
use super::instance::{instance_from_parts, Instance, InternalRef};
use super::memory::MemoryObject;
use super::object::ObjectHeader;
use super::table::TableObject;
use super::value::Value;
use crate::errors::Error;
use crate::types::{FunctionType, GlobalType, MemoryType, TableType, TagType};
use crate::Trap;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// One export of an intrinsic module.
pub enum IntrinsicExport {
    Function { ty: FunctionType, body: IntrinsicFn },
    Global { ty: GlobalType, initial: Value },
    Memory(MemoryType),
    Table(TableType),
    Tag(TagType),
}

/// A host-provided module: named functions, globals, memories, tables and
/// exception types that guest modules can import. Instantiate it into a
/// compartment to obtain resolvable objects.
pub struct IntrinsicModule {
    name: String,
    exports: Vec<(String, IntrinsicExport)>,
}

impl IntrinsicModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exports: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn define_function(
        &mut self,
        name: impl Into<String>,
        ty: FunctionType,
        body: IntrinsicFn,
    ) -> &mut Self {
        self.exports
            .push((name.into(), IntrinsicExport::Function { ty, body }));
        self
    }

    pub fn define_global(
        &mut self,
        name: impl Into<String>,
        ty: GlobalType,
        initial: Value,
    ) -> &mut Self {
        self.exports
            .push((name.into(), IntrinsicExport::Global { ty, initial }));
        self
    }

    pub fn define_memory(&mut self, name: impl Into<String>, ty: MemoryType) -> &mut Self {
        self.exports.push((name.into(), IntrinsicExport::Memory(ty)));
        self
    }

    pub fn define_table(&mut self, name: impl Into<String>, ty: TableType) -> &mut Self {
        self.exports.push((name.into(), IntrinsicExport::Table(ty)));
        self
    }

    pub fn define_tag(&mut self, name: impl Into<String>, ty: TagType) -> &mut Self {
        self.exports.push((name.into(), IntrinsicExport::Tag(ty)));
        self
    }

    /// Creates the module's objects inside `compartment` and wraps them in
    /// an instance whose exports carry the defined names.
    pub fn instantiate(&self, compartment: &Compartment) -> Result<Instance, Error> {
        let mut exports = Vec::with_capacity(self.exports.len());
        for (name, export) in &self.exports {
            let debug_name = format!("{}.{name}", self.name);
            let entry = match export {
                IntrinsicExport::Function { ty, body } => {
                    InternalRef::Function(Arc::new(FunctionData {
                        ty: *ty,
                        body: FunctionBody::Intrinsic(body.clone()),
                        mutable_data: Arc::new(FunctionMutableData::default()),
                        instance: None,
                        debug_name,
                    }))
                }
                IntrinsicExport::Global { ty, initial } => {
                    let global = Global::new(compartment, *ty, initial.clone())
                        .ok_or_else(|| Error::Runtime(Exception::trap(Trap::InvalidArgument)))?;
                    global.set_debug_name(&debug_name);
                    InternalRef::Global(global.id)
                }
                IntrinsicExport::Memory(ty) => {
                    let object = MemoryObject::new(*ty)
                        .ok_or_else(|| Error::Runtime(Exception::trap(Trap::OutOfMemory)))?;
                    let id = compartment.inner.state.write().memories.alloc(object);
                    InternalRef::Memory(id)
                }
                IntrinsicExport::Table(ty) => {
                    let object = TableObject::new(*ty)
                        .ok_or_else(|| Error::Runtime(Exception::trap(Trap::OutOfMemory)))?;
                    let id = compartment.inner.state.write().tables.alloc(object);
                    InternalRef::Table(id)
                }
                IntrinsicExport::Tag(ty) => {
                    let id = compartment.inner.state.write().tags.alloc(TagObject {
                        header: ObjectHeader::new(debug_name.as_str()),
                        ty: *ty,
                    });
                    InternalRef::Tag(id)
                }
            };
            exports.push((name.clone(), entry));
        }
        Ok(instance_from_parts(compartment, &self.name, exports))
    }
}
