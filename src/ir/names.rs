use crate::collections::HashMap;
use crate::indices::{
    DataIndex, ElemIndex, FuncIndex, GlobalIndex, LabelIndex, LocalIndex, MemoryIndex, TableIndex,
    TagIndex, TypeIndex,
};
use alloc::string::String;

/// Names for one function: the function itself, its locals (parameters
/// included), and its block labels.
#[derive(Debug, Default)]
pub struct FunctionNames {
    pub name: Option<String>,
    pub locals: HashMap<LocalIndex, String>,
    pub labels: HashMap<LabelIndex, String>,
}

/// The decoded contents of a custom `name` section.
///
/// Subsections after the local-names subsection require the
/// `extended_name_section` feature.
#[derive(Debug, Default)]
pub struct DisassemblyNames {
    pub module_name: Option<String>,
    pub functions: HashMap<FuncIndex, FunctionNames>,
    pub types: HashMap<TypeIndex, String>,
    pub tables: HashMap<TableIndex, String>,
    pub memories: HashMap<MemoryIndex, String>,
    pub globals: HashMap<GlobalIndex, String>,
    pub elem_segments: HashMap<ElemIndex, String>,
    pub data_segments: HashMap<DataIndex, String>,
    pub tags: HashMap<TagIndex, String>,
}

impl DisassemblyNames {
    pub fn function_name(&self, index: FuncIndex) -> Option<&str> {
        self.functions.get(&index)?.name.as_deref()
    }

    pub fn local_name(&self, func: FuncIndex, local: LocalIndex) -> Option<&str> {
        self.functions.get(&func)?.locals.get(&local).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.module_name.is_none()
            && self.functions.is_empty()
            && self.types.is_empty()
            && self.tables.is_empty()
            && self.memories.is_empty()
            && self.globals.is_empty()
            && self.elem_segments.is_empty()
            && self.data_segments.is_empty()
            && self.tags.is_empty()
    }
}
