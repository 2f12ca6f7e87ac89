//! The module codec: magic and version, section framing with ordering
//! rules, per-section decoders, and the canonical encoder. Decoding invokes
//! the validator after each section so later sections (and function bodies)
//! can rely on already-validated facts.

use super::operators::{decode_operator, encode_operator};
use super::stream::{Reader, Writer};
use super::types::{
    decode_const_expr, decode_function_type, decode_global_type, decode_memory_type,
    decode_reference_type, decode_table_type, decode_tag_type, decode_value_type,
    encode_const_expr, encode_function_type, encode_global_type, encode_memory_type,
    encode_reference_type, encode_table_type, encode_tag_type, encode_value_type,
};
use crate::errors::{Error, SerializationError};
use crate::indices::{
    EntityIndex, FuncIndex, GlobalIndex, MemoryIndex, TableIndex, TagIndex, TypeIndex,
};
use crate::ir::{
    ConstExpr, CustomSection, DataSegment, DataSegmentKind, ElemContents, ElemExpr, ElemSegment,
    ElemSegmentKind, Export, FeatureSpec, FunctionDef, GlobalDef, Import, Module, OrderedSection,
};
use crate::types::ExternKind;
use crate::validate;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

const MAGIC: [u8; 4] = *b"\0asm";
const VERSION: u32 = 1;

const SECTION_CUSTOM: u8 = 0;
const SECTION_TYPE: u8 = 1;
const SECTION_IMPORT: u8 = 2;
const SECTION_FUNCTION: u8 = 3;
const SECTION_TABLE: u8 = 4;
const SECTION_MEMORY: u8 = 5;
const SECTION_GLOBAL: u8 = 6;
const SECTION_EXPORT: u8 = 7;
const SECTION_START: u8 = 8;
const SECTION_ELEM: u8 = 9;
const SECTION_CODE: u8 = 10;
const SECTION_DATA: u8 = 11;
const SECTION_DATA_COUNT: u8 = 12;
const SECTION_TAG: u8 = 0x7F;

fn section_order(id: u8) -> Option<OrderedSection> {
    Some(match id {
        SECTION_TYPE => OrderedSection::Type,
        SECTION_IMPORT => OrderedSection::Import,
        SECTION_FUNCTION => OrderedSection::Function,
        SECTION_TABLE => OrderedSection::Table,
        SECTION_MEMORY => OrderedSection::Memory,
        SECTION_GLOBAL => OrderedSection::Global,
        SECTION_TAG => OrderedSection::Tag,
        SECTION_EXPORT => OrderedSection::Export,
        SECTION_START => OrderedSection::Start,
        SECTION_ELEM => OrderedSection::Elem,
        SECTION_DATA_COUNT => OrderedSection::DataCount,
        SECTION_CODE => OrderedSection::Code,
        SECTION_DATA => OrderedSection::Data,
        _ => return None,
    })
}

/// Decodes a binary module under `features`, validating it section by
/// section.
pub fn decode_module(bytes: &[u8], features: FeatureSpec) -> Result<Module, Error> {
    let mut reader = Reader::new(bytes);

    let magic = reader.read_bytes(4).map_err(Error::Serialization)?;
    if magic != &MAGIC[..] {
        return Err(reader.malformed("bad magic number").into());
    }
    let version_bytes = reader.read_bytes(4).map_err(Error::Serialization)?;
    let version = u32::from_le_bytes(version_bytes.try_into().unwrap());
    if version != VERSION {
        return Err(reader.malformed(format!("unsupported version {version}")).into());
    }

    let mut module = Module::new(features);
    let mut last_section = OrderedSection::ModuleBeginning;
    let mut expected_data_count: Option<u32> = None;
    let mut saw_code_section = false;

    while !reader.is_at_end() {
        let id = reader.read_u8().map_err(Error::Serialization)?;
        let len = reader.read_var_u32().map_err(Error::Serialization)? as usize;
        let mut section = reader.sub_reader(len).map_err(Error::Serialization)?;

        if id == SECTION_CUSTOM {
            let name = section.read_string().map_err(Error::Serialization)?;
            let payload = section
                .read_bytes(section.remaining())
                .map_err(Error::Serialization)?;
            tracing::trace!("custom section {name:?} ({} bytes)", payload.len());
            module.custom_sections.push(CustomSection {
                after_section: last_section,
                name,
                bytes: payload.to_vec(),
            });
            continue;
        }

        let order = section_order(id)
            .ok_or_else(|| Error::from(section.malformed(format!("unknown section id {id}"))))?;
        if order <= last_section {
            return Err(section
                .malformed(format!("out-of-order section id {id}"))
                .into());
        }
        last_section = order;

        match id {
            SECTION_TYPE => {
                decode_type_section(&mut section, &mut module)?;
                validate::validate_types(&module)?;
            }
            SECTION_IMPORT => {
                decode_import_section(&mut section, &mut module)?;
                validate::validate_imports(&module)?;
            }
            SECTION_FUNCTION => {
                decode_function_section(&mut section, &mut module)?;
                validate::validate_function_declarations(&module)?;
            }
            SECTION_TABLE => {
                decode_table_section(&mut section, &mut module)?;
                validate::validate_tables(&module)?;
            }
            SECTION_MEMORY => {
                decode_memory_section(&mut section, &mut module)?;
                validate::validate_memories(&module)?;
            }
            SECTION_GLOBAL => {
                decode_global_section(&mut section, &mut module)?;
                validate::validate_globals(&module)?;
            }
            SECTION_TAG => {
                decode_tag_section(&mut section, &mut module)?;
                validate::validate_tags(&module)?;
            }
            SECTION_EXPORT => {
                decode_export_section(&mut section, &mut module)?;
                validate::validate_exports(&module)?;
            }
            SECTION_START => {
                let index = FuncIndex::from_u32(section.read_var_u32().map_err(Error::Serialization)?);
                module.start_function = Some(index);
                validate::validate_start(&module)?;
            }
            SECTION_ELEM => {
                decode_elem_section(&mut section, &mut module)?;
                validate::validate_elem_segments(&module)?;
            }
            SECTION_DATA_COUNT => {
                expected_data_count =
                    Some(section.read_var_u32().map_err(Error::Serialization)?);
                module.has_data_count_section = true;
            }
            SECTION_CODE => {
                saw_code_section = true;
                decode_code_section(&mut section, &mut module, expected_data_count)?;
            }
            SECTION_DATA => {
                decode_data_section(&mut section, &mut module)?;
                if let Some(expected) = expected_data_count {
                    if expected as usize != module.data_segments.len() {
                        return Err(section
                            .malformed("data count section does not match data segment count")
                            .into());
                    }
                }
                validate::validate_data_segments(&module)?;
            }
            _ => unreachable!(),
        }
        section.expect_end("section").map_err(Error::Serialization)?;
    }

    if !module.functions.defs.is_empty() && !saw_code_section {
        return Err(reader.malformed("missing code section").into());
    }
    if let Some(expected) = expected_data_count {
        if module.data_segments.is_empty() && expected != 0 {
            return Err(reader
                .malformed("data count section does not match data segment count")
                .into());
        }
    }

    tracing::debug!(
        "decoded module: {} types, {} functions, {} exports",
        module.types.len(),
        module.functions.len(),
        module.exports.len()
    );
    Ok(module)
}

fn decode_type_section(reader: &mut Reader, module: &mut Module) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)?;
    for _ in 0..count {
        let ty = decode_function_type(reader).map_err(Error::Serialization)?;
        module.types.push(ty);
    }
    Ok(())
}

fn decode_import_section(reader: &mut Reader, module: &mut Module) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)?;
    for _ in 0..count {
        let import_module = reader.read_string().map_err(Error::Serialization)?;
        let name = reader.read_string().map_err(Error::Serialization)?;
        let kind = reader.read_u8().map_err(Error::Serialization)?;
        let entity = match kind {
            0x00 => {
                let ty = TypeIndex::from_u32(reader.read_var_u32().map_err(Error::Serialization)?);
                let index = FuncIndex::from_u32(
                    u32::try_from(module.functions.imports.len()).unwrap(),
                );
                module.functions.imports.push(Import {
                    module: import_module,
                    name,
                    ty,
                });
                EntityIndex::Function(index)
            }
            0x01 => {
                let ty = decode_table_type(reader).map_err(Error::Serialization)?;
                let index =
                    TableIndex::from_u32(u32::try_from(module.tables.imports.len()).unwrap());
                module.tables.imports.push(Import {
                    module: import_module,
                    name,
                    ty,
                });
                EntityIndex::Table(index)
            }
            0x02 => {
                let ty = decode_memory_type(reader).map_err(Error::Serialization)?;
                let index =
                    MemoryIndex::from_u32(u32::try_from(module.memories.imports.len()).unwrap());
                module.memories.imports.push(Import {
                    module: import_module,
                    name,
                    ty,
                });
                EntityIndex::Memory(index)
            }
            0x03 => {
                let ty = decode_global_type(reader).map_err(Error::Serialization)?;
                let index =
                    GlobalIndex::from_u32(u32::try_from(module.globals.imports.len()).unwrap());
                module.globals.imports.push(Import {
                    module: import_module,
                    name,
                    ty,
                });
                EntityIndex::Global(index)
            }
            0x04 => {
                let ty = decode_tag_type(reader).map_err(Error::Serialization)?;
                let index = TagIndex::from_u32(u32::try_from(module.tags.imports.len()).unwrap());
                module.tags.imports.push(Import {
                    module: import_module,
                    name,
                    ty,
                });
                EntityIndex::Tag(index)
            }
            kind => {
                return Err(reader
                    .malformed(format!("unknown import kind {kind}"))
                    .into())
            }
        };
        module.imports.push(entity);
    }
    Ok(())
}

fn decode_function_section(reader: &mut Reader, module: &mut Module) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)?;
    for _ in 0..count {
        let type_index = TypeIndex::from_u32(reader.read_var_u32().map_err(Error::Serialization)?);
        // Bodies are filled in by the code section.
        module.functions.defs.push(FunctionDef {
            type_index,
            locals: Vec::new(),
            code: Vec::new(),
        });
    }
    Ok(())
}

fn decode_table_section(reader: &mut Reader, module: &mut Module) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)?;
    for _ in 0..count {
        let ty = decode_table_type(reader).map_err(Error::Serialization)?;
        module.tables.defs.push(ty);
    }
    Ok(())
}

fn decode_memory_section(reader: &mut Reader, module: &mut Module) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)?;
    for _ in 0..count {
        let ty = decode_memory_type(reader).map_err(Error::Serialization)?;
        module.memories.defs.push(ty);
    }
    Ok(())
}

fn decode_global_section(reader: &mut Reader, module: &mut Module) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)?;
    for _ in 0..count {
        let ty = decode_global_type(reader).map_err(Error::Serialization)?;
        let initializer = decode_const_expr(reader).map_err(Error::Serialization)?;
        module.globals.defs.push(GlobalDef { ty, initializer });
    }
    Ok(())
}

fn decode_tag_section(reader: &mut Reader, module: &mut Module) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)?;
    for _ in 0..count {
        let ty = decode_tag_type(reader).map_err(Error::Serialization)?;
        module.tags.defs.push(ty);
    }
    Ok(())
}

fn decode_export_section(reader: &mut Reader, module: &mut Module) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)?;
    for _ in 0..count {
        let name = reader.read_string().map_err(Error::Serialization)?;
        let kind = reader.read_u8().map_err(Error::Serialization)?;
        let index = reader.read_var_u32().map_err(Error::Serialization)?;
        let index = match kind {
            0x00 => EntityIndex::Function(FuncIndex::from_u32(index)),
            0x01 => EntityIndex::Table(TableIndex::from_u32(index)),
            0x02 => EntityIndex::Memory(MemoryIndex::from_u32(index)),
            0x03 => EntityIndex::Global(GlobalIndex::from_u32(index)),
            0x04 => EntityIndex::Tag(TagIndex::from_u32(index)),
            kind => {
                return Err(reader
                    .malformed(format!("unknown export kind {kind}"))
                    .into())
            }
        };
        module.exports.push(Export { name, index });
    }
    Ok(())
}

fn decode_elem_expr(reader: &mut Reader) -> Result<ElemExpr, SerializationError> {
    let expr = match reader.read_u8()? {
        0xD0 => ElemExpr::RefNull(decode_reference_type(reader)?),
        0xD2 => ElemExpr::RefFunc(FuncIndex::from_u32(reader.read_var_u32()?)),
        byte => {
            return Err(reader.malformed(format!(
                "invalid element expression opcode 0x{byte:02x}"
            )))
        }
    };
    if reader.read_u8()? != 0x0B {
        return Err(reader.malformed("element expression is not terminated by end"));
    }
    Ok(expr)
}

fn encode_elem_expr(writer: &mut Writer, expr: &ElemExpr) {
    match expr {
        ElemExpr::RefNull(ty) => {
            writer.write_u8(0xD0);
            encode_reference_type(writer, *ty);
        }
        ElemExpr::RefFunc(index) => {
            writer.write_u8(0xD2);
            writer.write_var_u32(index.as_u32());
        }
    }
    writer.write_u8(0x0B);
}

fn decode_extern_kind_byte(reader: &mut Reader) -> Result<ExternKind, SerializationError> {
    match reader.read_u8()? {
        0x00 => Ok(ExternKind::Function),
        byte => Err(reader.malformed(format!("unknown element kind 0x{byte:02x}"))),
    }
}

const ELEM_FLAG_NOT_ACTIVE: u32 = 0b001;
const ELEM_FLAG_EXPLICIT_TABLE: u32 = 0b010;
const ELEM_FLAG_EXPRESSIONS: u32 = 0b100;

fn decode_elem_section(reader: &mut Reader, module: &mut Module) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)?;
    for _ in 0..count {
        let flags = reader.read_var_u32().map_err(Error::Serialization)?;
        if flags > 7 {
            return Err(reader
                .malformed(format!("invalid element segment flags {flags}"))
                .into());
        }

        let kind = if flags & ELEM_FLAG_NOT_ACTIVE != 0 {
            if flags & ELEM_FLAG_EXPLICIT_TABLE != 0 {
                ElemSegmentKind::Declared
            } else {
                ElemSegmentKind::Passive
            }
        } else {
            let table_index = if flags & ELEM_FLAG_EXPLICIT_TABLE != 0 {
                TableIndex::from_u32(reader.read_var_u32().map_err(Error::Serialization)?)
            } else {
                TableIndex::from_u32(0)
            };
            let offset = decode_const_expr(reader).map_err(Error::Serialization)?;
            ElemSegmentKind::Active {
                table_index,
                offset,
            }
        };

        // Flag combination 0 (active, table 0, bare indices) has no
        // element-kind byte; every other bare-index combination carries one.
        let contents = if flags & ELEM_FLAG_EXPRESSIONS != 0 {
            let elem_type = if flags == 4 {
                crate::types::ReferenceType::FuncRef
            } else {
                decode_reference_type(reader).map_err(Error::Serialization)?
            };
            let count = reader.read_var_u32().map_err(Error::Serialization)? as usize;
            let mut exprs = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                exprs.push(decode_elem_expr(reader).map_err(Error::Serialization)?);
            }
            ElemContents::Expressions { elem_type, exprs }
        } else {
            let kind = if flags == 0 {
                ExternKind::Function
            } else {
                decode_extern_kind_byte(reader).map_err(Error::Serialization)?
            };
            let count = reader.read_var_u32().map_err(Error::Serialization)? as usize;
            let mut indices = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                indices.push(reader.read_var_u32().map_err(Error::Serialization)?);
            }
            ElemContents::Indices { kind, indices }
        };

        module.elem_segments.push(ElemSegment { kind, contents });
    }
    Ok(())
}

fn encode_elem_section(writer: &mut Writer, module: &Module) {
    writer.write_var_u32(u32::try_from(module.elem_segments.len()).unwrap());
    for segment in &module.elem_segments {
        let expressions = matches!(segment.contents, ElemContents::Expressions { .. });
        let mut flags = 0u32;
        let mut active_parts: Option<(TableIndex, &ConstExpr)> = None;
        match &segment.kind {
            ElemSegmentKind::Active {
                table_index,
                offset,
            } => {
                if table_index.as_u32() != 0 {
                    flags |= ELEM_FLAG_EXPLICIT_TABLE;
                }
                active_parts = Some((*table_index, offset));
            }
            ElemSegmentKind::Passive => flags |= ELEM_FLAG_NOT_ACTIVE,
            ElemSegmentKind::Declared => {
                flags |= ELEM_FLAG_NOT_ACTIVE | ELEM_FLAG_EXPLICIT_TABLE;
            }
        }
        if expressions {
            flags |= ELEM_FLAG_EXPRESSIONS;
        }
        writer.write_var_u32(flags);

        if let Some((table_index, offset)) = active_parts {
            if flags & ELEM_FLAG_EXPLICIT_TABLE != 0 {
                writer.write_var_u32(table_index.as_u32());
            }
            encode_const_expr(writer, offset);
        }

        match &segment.contents {
            ElemContents::Expressions { elem_type, exprs } => {
                if flags != 4 {
                    encode_reference_type(writer, *elem_type);
                }
                writer.write_var_u32(u32::try_from(exprs.len()).unwrap());
                for expr in exprs {
                    encode_elem_expr(writer, expr);
                }
            }
            ElemContents::Indices { kind: _, indices } => {
                if flags != 0 {
                    writer.write_u8(0x00);
                }
                writer.write_var_u32(u32::try_from(indices.len()).unwrap());
                for index in indices {
                    writer.write_var_u32(*index);
                }
            }
        }
    }
}

fn decode_code_section(
    reader: &mut Reader,
    module: &mut Module,
    expected_data_count: Option<u32>,
) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)? as usize;
    if count != module.functions.defs.len() {
        return Err(reader
            .malformed("code section count does not match function section count")
            .into());
    }

    let declared = validate::declared_functions(module);

    for def_index in 0..count {
        let body_len = reader.read_var_u32().map_err(Error::Serialization)? as usize;
        let mut body = reader.sub_reader(body_len).map_err(Error::Serialization)?;

        // Local sets.
        let num_local_sets = body.read_var_u32().map_err(Error::Serialization)?;
        let mut locals = Vec::new();
        for _ in 0..num_local_sets {
            let n = body.read_var_u32().map_err(Error::Serialization)? as usize;
            let ty = decode_value_type(&mut body).map_err(Error::Serialization)?;
            if locals.len() + n > 50_000 {
                return Err(body.malformed("too many locals").into());
            }
            locals.extend(core::iter::repeat(ty).take(n));
        }

        let def_key =
            crate::indices::DefinedFuncIndex::from_u32(u32::try_from(def_index).unwrap());
        let type_index = module.functions.defs[def_key].type_index;
        let func_type = module.type_at(type_index).ok_or_else(|| {
            Error::from(crate::errors::ValidationError::new(format!(
                "invalid type index {}",
                type_index.as_u32()
            )))
        })?;

        // Decode, validate, and canonically re-encode the operator stream.
        let mut code_validator = validate::CodeValidator::with_data_count(
            module,
            func_type,
            &locals,
            &declared,
            expected_data_count,
        );
        let mut canonical = Writer::new();
        loop {
            let op = decode_operator(&mut body).map_err(Error::Serialization)?;
            code_validator.step(&op)?;
            encode_operator(&mut canonical, &op);
            if code_validator.is_finished() {
                break;
            }
        }
        body.expect_end("function body").map_err(Error::Serialization)?;

        let def = &mut module.functions.defs[def_key];
        def.locals = locals;
        def.code = canonical.into_bytes();
    }
    Ok(())
}

fn decode_data_section(reader: &mut Reader, module: &mut Module) -> Result<(), Error> {
    let count = reader.read_var_u32().map_err(Error::Serialization)?;
    for _ in 0..count {
        let flags = reader.read_var_u32().map_err(Error::Serialization)?;
        let kind = match flags {
            0 => DataSegmentKind::Active {
                memory_index: MemoryIndex::from_u32(0),
                offset: decode_const_expr(reader).map_err(Error::Serialization)?,
            },
            1 => DataSegmentKind::Passive,
            2 => {
                let memory_index =
                    MemoryIndex::from_u32(reader.read_var_u32().map_err(Error::Serialization)?);
                DataSegmentKind::Active {
                    memory_index,
                    offset: decode_const_expr(reader).map_err(Error::Serialization)?,
                }
            }
            flags => {
                return Err(reader
                    .malformed(format!("invalid data segment flags {flags}"))
                    .into())
            }
        };
        let len = reader.read_var_u32().map_err(Error::Serialization)? as usize;
        let bytes = reader.read_bytes(len).map_err(Error::Serialization)?;
        module.data_segments.push(DataSegment {
            kind,
            bytes: Arc::from(bytes),
        });
    }
    Ok(())
}

/// Encodes a module canonically: shortest-form LEB128s, zero-valued
/// memory/table indices as a single zero byte, sections in order with
/// custom sections at their recorded anchors.
pub fn encode_module(module: &Module) -> Vec<u8> {
    let mut writer = Writer::with_capacity(1024);
    writer.write_bytes(&MAGIC);
    writer.write_bytes(&VERSION.to_le_bytes());

    emit_customs(&mut writer, module, OrderedSection::ModuleBeginning);

    if !module.types.is_empty() {
        write_section(&mut writer, SECTION_TYPE, |body| {
            body.write_var_u32(u32::try_from(module.types.len()).unwrap());
            for (_, ty) in module.types.iter() {
                encode_function_type(body, *ty);
            }
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Type);

    if !module.imports.is_empty() {
        write_section(&mut writer, SECTION_IMPORT, |body| {
            body.write_var_u32(u32::try_from(module.imports.len()).unwrap());
            for entity in &module.imports {
                encode_import(body, module, *entity);
            }
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Import);

    if !module.functions.defs.is_empty() {
        write_section(&mut writer, SECTION_FUNCTION, |body| {
            body.write_var_u32(u32::try_from(module.functions.defs.len()).unwrap());
            for (_, def) in module.functions.defs.iter() {
                body.write_var_u32(def.type_index.as_u32());
            }
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Function);

    if !module.tables.defs.is_empty() {
        write_section(&mut writer, SECTION_TABLE, |body| {
            body.write_var_u32(u32::try_from(module.tables.defs.len()).unwrap());
            for (_, ty) in module.tables.defs.iter() {
                encode_table_type(body, *ty);
            }
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Table);

    if !module.memories.defs.is_empty() {
        write_section(&mut writer, SECTION_MEMORY, |body| {
            body.write_var_u32(u32::try_from(module.memories.defs.len()).unwrap());
            for (_, ty) in module.memories.defs.iter() {
                encode_memory_type(body, *ty);
            }
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Memory);

    if !module.globals.defs.is_empty() {
        write_section(&mut writer, SECTION_GLOBAL, |body| {
            body.write_var_u32(u32::try_from(module.globals.defs.len()).unwrap());
            for (_, def) in module.globals.defs.iter() {
                encode_global_type(body, def.ty);
                encode_const_expr(body, &def.initializer);
            }
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Global);

    if !module.tags.defs.is_empty() {
        write_section(&mut writer, SECTION_TAG, |body| {
            body.write_var_u32(u32::try_from(module.tags.defs.len()).unwrap());
            for (_, ty) in module.tags.defs.iter() {
                encode_tag_type(body, *ty);
            }
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Tag);

    if !module.exports.is_empty() {
        write_section(&mut writer, SECTION_EXPORT, |body| {
            body.write_var_u32(u32::try_from(module.exports.len()).unwrap());
            for export in &module.exports {
                body.write_string(&export.name);
                let (kind, index) = match export.index {
                    EntityIndex::Function(i) => (0x00, i.as_u32()),
                    EntityIndex::Table(i) => (0x01, i.as_u32()),
                    EntityIndex::Memory(i) => (0x02, i.as_u32()),
                    EntityIndex::Global(i) => (0x03, i.as_u32()),
                    EntityIndex::Tag(i) => (0x04, i.as_u32()),
                };
                body.write_u8(kind);
                body.write_var_u32(index);
            }
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Export);

    if let Some(start) = module.start_function {
        write_section(&mut writer, SECTION_START, |body| {
            body.write_var_u32(start.as_u32());
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Start);

    if !module.elem_segments.is_empty() {
        write_section(&mut writer, SECTION_ELEM, |body| {
            encode_elem_section(body, module);
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Elem);

    if module.has_data_count_section {
        write_section(&mut writer, SECTION_DATA_COUNT, |body| {
            body.write_var_u32(u32::try_from(module.data_segments.len()).unwrap());
        });
    }
    emit_customs(&mut writer, module, OrderedSection::DataCount);

    if !module.functions.defs.is_empty() {
        write_section(&mut writer, SECTION_CODE, |body| {
            body.write_var_u32(u32::try_from(module.functions.defs.len()).unwrap());
            for (_, def) in module.functions.defs.iter() {
                let mut func_body = Writer::new();
                encode_locals(&mut func_body, &def.locals);
                func_body.write_bytes(&def.code);
                body.write_var_u32(u32::try_from(func_body.len()).unwrap());
                body.write_bytes(func_body.as_bytes());
            }
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Code);

    if !module.data_segments.is_empty() {
        write_section(&mut writer, SECTION_DATA, |body| {
            body.write_var_u32(u32::try_from(module.data_segments.len()).unwrap());
            for segment in &module.data_segments {
                match &segment.kind {
                    DataSegmentKind::Active {
                        memory_index,
                        offset,
                    } => {
                        if memory_index.as_u32() == 0 {
                            body.write_var_u32(0);
                        } else {
                            body.write_var_u32(2);
                            body.write_var_u32(memory_index.as_u32());
                        }
                        encode_const_expr(body, offset);
                    }
                    DataSegmentKind::Passive => body.write_var_u32(1),
                }
                body.write_var_u32(u32::try_from(segment.bytes.len()).unwrap());
                body.write_bytes(&segment.bytes);
            }
        });
    }
    emit_customs(&mut writer, module, OrderedSection::Data);

    writer.into_bytes()
}

fn write_section(writer: &mut Writer, id: u8, fill: impl FnOnce(&mut Writer)) {
    let mut body = Writer::new();
    fill(&mut body);
    writer.write_u8(id);
    writer.write_var_u32(u32::try_from(body.len()).unwrap());
    writer.write_bytes(body.as_bytes());
}

fn emit_customs(writer: &mut Writer, module: &Module, anchor: OrderedSection) {
    for section in &module.custom_sections {
        if section.after_section == anchor {
            let mut body = Writer::new();
            body.write_string(&section.name);
            body.write_bytes(&section.bytes);
            writer.write_u8(SECTION_CUSTOM);
            writer.write_var_u32(u32::try_from(body.len()).unwrap());
            writer.write_bytes(body.as_bytes());
        }
    }
}

fn encode_import(writer: &mut Writer, module: &Module, entity: EntityIndex) {
    match entity {
        EntityIndex::Function(i) => {
            let import = &module.functions.imports[i.as_u32() as usize];
            writer.write_string(&import.module);
            writer.write_string(&import.name);
            writer.write_u8(0x00);
            writer.write_var_u32(import.ty.as_u32());
        }
        EntityIndex::Table(i) => {
            let import = &module.tables.imports[i.as_u32() as usize];
            writer.write_string(&import.module);
            writer.write_string(&import.name);
            writer.write_u8(0x01);
            encode_table_type(writer, import.ty);
        }
        EntityIndex::Memory(i) => {
            let import = &module.memories.imports[i.as_u32() as usize];
            writer.write_string(&import.module);
            writer.write_string(&import.name);
            writer.write_u8(0x02);
            encode_memory_type(writer, import.ty);
        }
        EntityIndex::Global(i) => {
            let import = &module.globals.imports[i.as_u32() as usize];
            writer.write_string(&import.module);
            writer.write_string(&import.name);
            writer.write_u8(0x03);
            encode_global_type(writer, import.ty);
        }
        EntityIndex::Tag(i) => {
            let import = &module.tags.imports[i.as_u32() as usize];
            writer.write_string(&import.module);
            writer.write_string(&import.name);
            writer.write_u8(0x04);
            encode_tag_type(writer, import.ty);
        }
    }
}

fn encode_locals(writer: &mut Writer, locals: &[crate::types::ValueType]) {
    // Run-length encode consecutive identical local types.
    let mut runs: Vec<(u32, crate::types::ValueType)> = Vec::new();
    for ty in locals {
        match runs.last_mut() {
            Some((count, last)) if last == ty => *count += 1,
            _ => runs.push((1, *ty)),
        }
    }
    writer.write_var_u32(u32::try_from(runs.len()).unwrap());
    for (count, ty) in runs {
        writer.write_var_u32(count);
        encode_value_type(writer, ty);
    }
}
