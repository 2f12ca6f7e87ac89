use crate::indices::{
    DefinedFuncIndex, DefinedGlobalIndex, DefinedMemoryIndex, DefinedTableIndex, DefinedTagIndex,
    EntityIndex, FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TagIndex, TypeIndex,
};
use crate::ir::{ConstExpr, FeatureSpec};
use crate::types::{
    ExternKind, ExternType, FunctionType, GlobalType, MemoryType, ReferenceType, TableType, TagType,
    ValueType,
};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use cranelift_entity::{EntityRef, PrimaryMap};

/// An import: where it comes from and the type it must resolve to.
#[derive(Debug, Clone)]
pub struct Import<T> {
    pub module: String,
    pub name: String,
    pub ty: T,
}

/// One kind's index space: imported entries first, then defined entries.
#[derive(Debug)]
pub struct IndexSpace<I: EntityRef, Def, ImportTy> {
    pub imports: Vec<Import<ImportTy>>,
    pub defs: PrimaryMap<I, Def>,
}

impl<I: EntityRef, Def, ImportTy> Default for IndexSpace<I, Def, ImportTy> {
    fn default() -> Self {
        Self {
            imports: Vec::new(),
            defs: PrimaryMap::new(),
        }
    }
}

impl<I: EntityRef, Def, ImportTy> IndexSpace<I, Def, ImportTy> {
    pub fn len(&self) -> usize {
        self.imports.len() + self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_imports(&self) -> usize {
        self.imports.len()
    }

    #[inline]
    pub fn is_import(&self, index: u32) -> bool {
        (index as usize) < self.imports.len()
    }

    /// Maps a flat index to the index of a defined entry, or `None` for
    /// imports.
    #[inline]
    pub fn defined_index(&self, index: u32) -> Option<I> {
        let index = index as usize;
        if index < self.imports.len() {
            None
        } else {
            Some(I::new(index - self.imports.len()))
        }
    }

    /// Maps a defined-entry index back to its flat index.
    #[inline]
    pub fn flat_index(&self, def_index: I) -> u32 {
        u32::try_from(self.imports.len() + def_index.index()).unwrap()
    }
}

/// A defined function: its type, non-parameter locals, and the serialized
/// operator stream of its body (canonical encoding, terminated by `end`).
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub type_index: TypeIndex,
    pub locals: Vec<ValueType>,
    pub code: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub ty: GlobalType,
    pub initializer: ConstExpr,
}

#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub index: EntityIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemSegmentKind {
    Active {
        table_index: TableIndex,
        offset: ConstExpr,
    },
    Passive,
    Declared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemExpr {
    RefNull(ReferenceType),
    RefFunc(FuncIndex),
}

/// The two encodings of an element segment's contents.
#[derive(Debug, Clone)]
pub enum ElemContents {
    Expressions {
        elem_type: ReferenceType,
        exprs: Vec<ElemExpr>,
    },
    Indices {
        kind: ExternKind,
        indices: Vec<u32>,
    },
}

impl ElemContents {
    pub fn len(&self) -> usize {
        match self {
            ElemContents::Expressions { exprs, .. } => exprs.len(),
            ElemContents::Indices { indices, .. } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The reference type the segment's elements have.
    pub fn element_type(&self) -> ReferenceType {
        match self {
            ElemContents::Expressions { elem_type, .. } => *elem_type,
            ElemContents::Indices { .. } => ReferenceType::FuncRef,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElemSegment {
    pub kind: ElemSegmentKind,
    pub contents: ElemContents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSegmentKind {
    Active {
        memory_index: MemoryIndex,
        offset: ConstExpr,
    },
    Passive,
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub kind: DataSegmentKind,
    pub bytes: Arc<[u8]>,
}

/// The known sections in their required order. Custom sections record which
/// of these boundaries they followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderedSection {
    ModuleBeginning,
    Type,
    Import,
    Function,
    Table,
    Memory,
    Global,
    Tag,
    Export,
    Start,
    Elem,
    DataCount,
    Code,
    Data,
}

#[derive(Debug, Clone)]
pub struct CustomSection {
    pub after_section: OrderedSection,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A decoded module, holding everything in its order of appearance in the
/// binary format.
#[derive(Debug, Default)]
pub struct Module {
    pub features: FeatureSpec,

    pub types: PrimaryMap<TypeIndex, FunctionType>,

    /// Imports in declaration order, referencing the per-kind index spaces.
    pub imports: Vec<EntityIndex>,

    pub functions: IndexSpace<DefinedFuncIndex, FunctionDef, TypeIndex>,
    pub tables: IndexSpace<DefinedTableIndex, TableType, TableType>,
    pub memories: IndexSpace<DefinedMemoryIndex, MemoryType, MemoryType>,
    pub globals: IndexSpace<DefinedGlobalIndex, GlobalDef, GlobalType>,
    pub tags: IndexSpace<DefinedTagIndex, TagType, TagType>,

    pub exports: Vec<Export>,
    pub start_function: Option<FuncIndex>,

    pub elem_segments: Vec<ElemSegment>,
    pub data_segments: Vec<DataSegment>,

    pub custom_sections: Vec<CustomSection>,

    /// Whether the binary carried a data-count section (re-emitted on
    /// encode for byte-exact round trips).
    pub has_data_count_section: bool,
}

impl Module {
    pub fn new(features: FeatureSpec) -> Self {
        Self {
            features,
            ..Self::default()
        }
    }

    pub fn type_at(&self, index: TypeIndex) -> Option<FunctionType> {
        self.types.get(index).copied()
    }

    /// The type index a function declares, whether imported or defined.
    pub fn function_type_index(&self, index: FuncIndex) -> Option<TypeIndex> {
        let flat = index.as_u32() as usize;
        if let Some(import) = self.functions.imports.get(flat) {
            Some(import.ty)
        } else {
            let def = self.functions.defined_index(index.as_u32())?;
            self.functions.defs.get(def).map(|f| f.type_index)
        }
    }

    pub fn function_type(&self, index: FuncIndex) -> Option<FunctionType> {
        self.type_at(self.function_type_index(index)?)
    }

    pub fn table_type(&self, index: TableIndex) -> Option<TableType> {
        let flat = index.as_u32() as usize;
        if let Some(import) = self.tables.imports.get(flat) {
            Some(import.ty)
        } else {
            let def = self.tables.defined_index(index.as_u32())?;
            self.tables.defs.get(def).copied()
        }
    }

    pub fn memory_type(&self, index: MemoryIndex) -> Option<MemoryType> {
        let flat = index.as_u32() as usize;
        if let Some(import) = self.memories.imports.get(flat) {
            Some(import.ty)
        } else {
            let def = self.memories.defined_index(index.as_u32())?;
            self.memories.defs.get(def).copied()
        }
    }

    pub fn global_type(&self, index: GlobalIndex) -> Option<GlobalType> {
        let flat = index.as_u32() as usize;
        if let Some(import) = self.globals.imports.get(flat) {
            Some(import.ty)
        } else {
            let def = self.globals.defined_index(index.as_u32())?;
            self.globals.defs.get(def).map(|g| g.ty)
        }
    }

    pub fn tag_type(&self, index: TagIndex) -> Option<TagType> {
        let flat = index.as_u32() as usize;
        if let Some(import) = self.tags.imports.get(flat) {
            Some(import.ty)
        } else {
            let def = self.tags.defined_index(index.as_u32())?;
            self.tags.defs.get(def).copied()
        }
    }

    /// The type of the entity an export or import index refers to.
    pub fn extern_type(&self, index: EntityIndex) -> Option<ExternType> {
        Some(match index {
            EntityIndex::Function(i) => ExternType::Function(self.function_type(i)?),
            EntityIndex::Table(i) => ExternType::Table(self.table_type(i)?),
            EntityIndex::Memory(i) => ExternType::Memory(self.memory_type(i)?),
            EntityIndex::Global(i) => ExternType::Global(self.global_type(i)?),
            EntityIndex::Tag(i) => ExternType::Tag(self.tag_type(i)?),
        })
    }

    /// Resolves one entry of [`Module::imports`] to its module/name strings
    /// and expected type.
    pub fn import_info(&self, index: EntityIndex) -> Option<(&str, &str, ExternType)> {
        match index {
            EntityIndex::Function(i) => {
                let import = self.functions.imports.get(i.as_u32() as usize)?;
                let ty = ExternType::Function(self.type_at(import.ty)?);
                Some((&import.module, &import.name, ty))
            }
            EntityIndex::Table(i) => {
                let import = self.tables.imports.get(i.as_u32() as usize)?;
                Some((&import.module, &import.name, ExternType::Table(import.ty)))
            }
            EntityIndex::Memory(i) => {
                let import = self.memories.imports.get(i.as_u32() as usize)?;
                Some((&import.module, &import.name, ExternType::Memory(import.ty)))
            }
            EntityIndex::Global(i) => {
                let import = self.globals.imports.get(i.as_u32() as usize)?;
                Some((&import.module, &import.name, ExternType::Global(import.ty)))
            }
            EntityIndex::Tag(i) => {
                let import = self.tags.imports.get(i.as_u32() as usize)?;
                Some((&import.module, &import.name, ExternType::Tag(import.ty)))
            }
        }
    }
}
