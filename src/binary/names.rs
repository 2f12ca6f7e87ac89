//! The custom `name` section: a map from index to UTF-8 name per kind.
//! Subsection kinds after the local-names subsection require the
//! `extended_name_section` feature; a violation is a fatal serialization
//! error.

use super::stream::{Reader, Writer};
use crate::collections::HashMap;
use crate::errors::SerializationError;
use crate::indices::{
    DataIndex, ElemIndex, FuncIndex, GlobalIndex, LabelIndex, LocalIndex, MemoryIndex, TableIndex,
    TagIndex, TypeIndex,
};
use crate::ir::{DisassemblyNames, FeatureSpec, FunctionNames};
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

/// The conventional name of the section.
pub const NAME_SECTION: &str = "name";

const SUBSECTION_MODULE: u8 = 0;
const SUBSECTION_FUNCTION: u8 = 1;
const SUBSECTION_LOCAL: u8 = 2;
const SUBSECTION_LABEL: u8 = 3;
const SUBSECTION_TYPE: u8 = 4;
const SUBSECTION_TABLE: u8 = 5;
const SUBSECTION_MEMORY: u8 = 6;
const SUBSECTION_GLOBAL: u8 = 7;
const SUBSECTION_ELEM: u8 = 8;
const SUBSECTION_DATA: u8 = 9;
const SUBSECTION_TAG: u8 = 10;

fn read_name_map<I: Copy + Eq + core::hash::Hash>(
    reader: &mut Reader,
    make: impl Fn(u32) -> I,
) -> Result<HashMap<I, String>, SerializationError> {
    let count = reader.read_var_u32()?;
    let mut map = HashMap::new();
    for _ in 0..count {
        let index = reader.read_var_u32()?;
        let name = reader.read_string()?;
        map.set(make(index), name);
    }
    Ok(map)
}

fn write_name_map<I: Copy + Eq + core::hash::Hash>(
    writer: &mut Writer,
    map: &HashMap<I, String>,
    index_of: impl Fn(I) -> u32,
) {
    let mut entries: Vec<(u32, &String)> = map.iter().map(|(i, name)| (index_of(*i), name)).collect();
    entries.sort_by_key(|(index, _)| *index);
    writer.write_var_u32(u32::try_from(entries.len()).unwrap());
    for (index, name) in entries {
        writer.write_var_u32(index);
        writer.write_string(name);
    }
}

/// Decodes a name-section payload.
pub fn decode_name_section(
    bytes: &[u8],
    features: &FeatureSpec,
) -> Result<DisassemblyNames, SerializationError> {
    let mut reader = Reader::new(bytes);
    let mut names = DisassemblyNames::default();

    while !reader.is_at_end() {
        let id = reader.read_u8()?;
        let len = reader.read_var_u32()? as usize;
        let mut subsection = reader.sub_reader(len)?;

        if id > SUBSECTION_LOCAL && !features.extended_name_section {
            return Err(subsection.feature_required(format!(
                "name subsection {id} requires the extended name section"
            )));
        }

        match id {
            SUBSECTION_MODULE => names.module_name = Some(subsection.read_string()?),
            SUBSECTION_FUNCTION => {
                let map = read_name_map(&mut subsection, FuncIndex::from_u32)?;
                for (index, name) in map.iter() {
                    names
                        .functions
                        .get_or_insert_with(*index, FunctionNames::default)
                        .name = Some(name.clone());
                }
            }
            SUBSECTION_LOCAL => {
                let count = subsection.read_var_u32()?;
                for _ in 0..count {
                    let func = FuncIndex::from_u32(subsection.read_var_u32()?);
                    let locals = read_name_map(&mut subsection, LocalIndex::from_u32)?;
                    names
                        .functions
                        .get_or_insert_with(func, FunctionNames::default)
                        .locals = locals;
                }
            }
            SUBSECTION_LABEL => {
                let count = subsection.read_var_u32()?;
                for _ in 0..count {
                    let func = FuncIndex::from_u32(subsection.read_var_u32()?);
                    let labels = read_name_map(&mut subsection, LabelIndex::from_u32)?;
                    names
                        .functions
                        .get_or_insert_with(func, FunctionNames::default)
                        .labels = labels;
                }
            }
            SUBSECTION_TYPE => names.types = read_name_map(&mut subsection, TypeIndex::from_u32)?,
            SUBSECTION_TABLE => {
                names.tables = read_name_map(&mut subsection, TableIndex::from_u32)?;
            }
            SUBSECTION_MEMORY => {
                names.memories = read_name_map(&mut subsection, MemoryIndex::from_u32)?;
            }
            SUBSECTION_GLOBAL => {
                names.globals = read_name_map(&mut subsection, GlobalIndex::from_u32)?;
            }
            SUBSECTION_ELEM => {
                names.elem_segments = read_name_map(&mut subsection, ElemIndex::from_u32)?;
            }
            SUBSECTION_DATA => {
                names.data_segments = read_name_map(&mut subsection, DataIndex::from_u32)?;
            }
            SUBSECTION_TAG => names.tags = read_name_map(&mut subsection, TagIndex::from_u32)?,
            id => {
                // Unknown subsections are skipped for forward compatibility.
                tracing::warn!("skipping unknown name subsection {id}");
                let _ = subsection.read_bytes(subsection.remaining())?;
            }
        }
        subsection.expect_end("name subsection")?;
    }

    Ok(names)
}

/// Encodes a name-section payload. Maps are written in ascending index
/// order so the output is deterministic.
pub fn encode_name_section(names: &DisassemblyNames) -> Vec<u8> {
    let mut writer = Writer::new();

    let mut subsection = |id: u8, fill: &dyn Fn(&mut Writer)| {
        let mut body = Writer::new();
        fill(&mut body);
        if !body.is_empty() {
            writer.write_u8(id);
            writer.write_var_u32(u32::try_from(body.len()).unwrap());
            writer.write_bytes(body.as_bytes());
        }
    };

    if let Some(module_name) = &names.module_name {
        subsection(SUBSECTION_MODULE, &|body| body.write_string(module_name));
    }

    let mut function_entries: Vec<(u32, &FunctionNames)> = names
        .functions
        .iter()
        .map(|(index, entry)| (index.as_u32(), entry))
        .collect();
    function_entries.sort_by_key(|(index, _)| *index);

    if function_entries.iter().any(|(_, entry)| entry.name.is_some()) {
        subsection(SUBSECTION_FUNCTION, &|body| {
            let named: Vec<_> = function_entries
                .iter()
                .filter_map(|(index, entry)| entry.name.as_ref().map(|name| (*index, name)))
                .collect();
            body.write_var_u32(u32::try_from(named.len()).unwrap());
            for (index, name) in named {
                body.write_var_u32(index);
                body.write_string(name);
            }
        });
    }

    if function_entries.iter().any(|(_, entry)| !entry.locals.is_empty()) {
        subsection(SUBSECTION_LOCAL, &|body| {
            let with_locals: Vec<_> = function_entries
                .iter()
                .filter(|(_, entry)| !entry.locals.is_empty())
                .collect();
            body.write_var_u32(u32::try_from(with_locals.len()).unwrap());
            for (index, entry) in with_locals {
                body.write_var_u32(*index);
                write_name_map(body, &entry.locals, LocalIndex::as_u32);
            }
        });
    }

    if function_entries.iter().any(|(_, entry)| !entry.labels.is_empty()) {
        subsection(SUBSECTION_LABEL, &|body| {
            let with_labels: Vec<_> = function_entries
                .iter()
                .filter(|(_, entry)| !entry.labels.is_empty())
                .collect();
            body.write_var_u32(u32::try_from(with_labels.len()).unwrap());
            for (index, entry) in with_labels {
                body.write_var_u32(*index);
                write_name_map(body, &entry.labels, LabelIndex::as_u32);
            }
        });
    }

    if !names.types.is_empty() {
        subsection(SUBSECTION_TYPE, &|body| {
            write_name_map(body, &names.types, TypeIndex::as_u32);
        });
    }
    if !names.tables.is_empty() {
        subsection(SUBSECTION_TABLE, &|body| {
            write_name_map(body, &names.tables, TableIndex::as_u32);
        });
    }
    if !names.memories.is_empty() {
        subsection(SUBSECTION_MEMORY, &|body| {
            write_name_map(body, &names.memories, MemoryIndex::as_u32);
        });
    }
    if !names.globals.is_empty() {
        subsection(SUBSECTION_GLOBAL, &|body| {
            write_name_map(body, &names.globals, GlobalIndex::as_u32);
        });
    }
    if !names.elem_segments.is_empty() {
        subsection(SUBSECTION_ELEM, &|body| {
            write_name_map(body, &names.elem_segments, ElemIndex::as_u32);
        });
    }
    if !names.data_segments.is_empty() {
        subsection(SUBSECTION_DATA, &|body| {
            write_name_map(body, &names.data_segments, DataIndex::as_u32);
        });
    }
    if !names.tags.is_empty() {
        subsection(SUBSECTION_TAG, &|body| {
            write_name_map(body, &names.tags, TagIndex::as_u32);
        });
    }

    writer.into_bytes()
}
