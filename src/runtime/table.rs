use super::compartment::{define_gc_handle, Compartment};
use super::function::FunctionRemap;
use super::object::ObjectHeader;
use super::value::Value;
use crate::indices::TableId;
use crate::types::{ReferenceType, TableType, ValueType};
use crate::{Trap, TABLE_MAX};
use alloc::vec::Vec;

pub(crate) struct TableObject {
    pub header: ObjectHeader,
    pub ty: TableType,
    pub elements: Vec<Value>,
}

impl TableObject {
    fn null_element(ty: &TableType) -> Value {
        match ty.element_type {
            ReferenceType::FuncRef => Value::FuncRef(None),
            ReferenceType::ExternRef => Value::ExternRef(None),
        }
    }

    pub fn new(ty: TableType) -> Option<TableObject> {
        let min = usize::try_from(ty.size.min).ok()?;
        if min > TABLE_MAX {
            return None;
        }
        Some(TableObject {
            header: ObjectHeader::new("table"),
            ty,
            elements: alloc::vec![Self::null_element(&ty); min],
        })
    }

    pub fn deep_clone(&self, remap: &FunctionRemap) -> TableObject {
        TableObject {
            header: ObjectHeader::new(self.header.debug_name.lock().clone()),
            ty: self.ty,
            elements: self
                .elements
                .iter()
                .map(|value| remap.remap_value(value))
                .collect(),
        }
    }
}

define_gc_handle!(
    /// A root reference to a table of references.
    Table,
    TableId,
    tables,
    TableObject
);

impl Table {
    /// Creates a table in `compartment`, filled with null references;
    /// returns `None` on allocation failure.
    pub fn new(compartment: &Compartment, ty: TableType) -> Option<Table> {
        let object = TableObject::new(ty)?;
        let id = {
            let mut state = compartment.inner.state.write();
            state.tables.alloc(object)
        };
        Some(Table::from_id(compartment.inner.clone(), id))
    }

    pub fn ty(&self) -> TableType {
        self.with_object(|object| object.ty)
    }

    /// The current size in elements.
    pub fn size(&self) -> u64 {
        self.with_object(|object| u64::try_from(object.elements.len()).unwrap())
    }

    fn check_element(&self, value: &Value) -> Result<(), Trap> {
        let expected: ValueType = self.ty().element_type.into();
        if value.type_of() != expected {
            return Err(Trap::InvalidArgument);
        }
        Ok(())
    }

    pub fn get(&self, index: u64) -> Result<Value, Trap> {
        self.with_object(|object| {
            let index = usize::try_from(index).map_err(|_| Trap::TableIndexOutOfBounds)?;
            object
                .elements
                .get(index)
                .cloned()
                .ok_or(Trap::TableIndexOutOfBounds)
        })
    }

    pub fn set(&self, index: u64, value: Value) -> Result<(), Trap> {
        self.check_element(&value)?;
        self.with_object_mut(|object| {
            let index = usize::try_from(index).map_err(|_| Trap::TableIndexOutOfBounds)?;
            let slot = object
                .elements
                .get_mut(index)
                .ok_or(Trap::TableIndexOutOfBounds)?;
            *slot = value;
            Ok(())
        })
    }

    /// Grows by `delta` elements initialized to `init`, returning the
    /// previous size, or `None` if the new size would exceed the maximum.
    pub fn grow(&self, delta: u64, init: Value) -> Option<u64> {
        self.check_element(&init).ok()?;
        self.with_object_mut(|object| {
            let old = u64::try_from(object.elements.len()).unwrap();
            let new = old.checked_add(delta)?;
            if new > object.ty.size.max || usize::try_from(new).ok()? > TABLE_MAX {
                return None;
            }
            object
                .elements
                .resize(usize::try_from(new).unwrap(), init);
            Some(old)
        })
    }

    /// Fills `[start, start+count)` with `value`.
    pub fn fill(&self, start: u64, value: Value, count: u64) -> Result<(), Trap> {
        self.check_element(&value)?;
        self.with_object_mut(|object| {
            let len = u64::try_from(object.elements.len()).unwrap();
            let end = start.checked_add(count).ok_or(Trap::TableIndexOutOfBounds)?;
            if end > len {
                return Err(Trap::TableIndexOutOfBounds);
            }
            let start = usize::try_from(start).unwrap();
            let end = usize::try_from(end).unwrap();
            for slot in &mut object.elements[start..end] {
                *slot = value.clone();
            }
            Ok(())
        })
    }

    /// Copies `count` elements from `source` starting at `source_start`
    /// into `self` starting at `dest_start`. The tables may be the same;
    /// overlapping ranges copy as if through a temporary.
    pub fn copy(
        &self,
        dest_start: u64,
        source: &Table,
        source_start: u64,
        count: u64,
    ) -> Result<(), Trap> {
        let elements: Vec<Value> = source.with_object(|object| {
            let len = u64::try_from(object.elements.len()).unwrap();
            let end = source_start
                .checked_add(count)
                .ok_or(Trap::TableIndexOutOfBounds)?;
            if end > len {
                return Err(Trap::TableIndexOutOfBounds);
            }
            let start = usize::try_from(source_start).unwrap();
            let end = usize::try_from(end).unwrap();
            Ok(object.elements[start..end].to_vec())
        })?;

        self.with_object_mut(|object| {
            let len = u64::try_from(object.elements.len()).unwrap();
            let end = dest_start
                .checked_add(count)
                .ok_or(Trap::TableIndexOutOfBounds)?;
            if end > len {
                return Err(Trap::TableIndexOutOfBounds);
            }
            let start = usize::try_from(dest_start).unwrap();
            object.elements[start..start + elements.len()].clone_from_slice(&elements);
            Ok(())
        })
    }
}
