//! One-direction WAST rendering for diagnostics. There is no text parser;
//! the output is meant for humans and error messages, not round-tripping.

use crate::binary::OperatorsReader;
use crate::indices::{EntityIndex, FuncIndex};
use crate::ir::operators::Operator;
use crate::ir::{
    DataSegmentKind, DisassemblyNames, ElemContents, ElemExpr, ElemSegmentKind, Module,
};
use crate::types::{FunctionType, GlobalType, MemoryType, TableType};
use alloc::string::String;
use core::fmt::Write;

fn write_function_signature(out: &mut String, ty: FunctionType) {
    for param in ty.params().elems() {
        let _ = write!(out, " (param {param})");
    }
    for result in ty.results().elems() {
        let _ = write!(out, " (result {result})");
    }
}

fn write_table_type(out: &mut String, ty: TableType) {
    let _ = write!(out, " {}", ty.size.min);
    if ty.size.is_bounded() {
        let _ = write!(out, " {}", ty.size.max);
    }
    let _ = write!(out, " {}", ty.element_type);
}

fn write_memory_type(out: &mut String, ty: MemoryType) {
    let _ = write!(out, " {}", ty.size.min);
    if ty.size.is_bounded() {
        let _ = write!(out, " {}", ty.size.max);
    }
    if ty.shared {
        out.push_str(" shared");
    }
}

fn write_global_type(out: &mut String, ty: GlobalType) {
    let _ = write!(out, " {ty}");
}

fn write_operator(out: &mut String, indent: &mut usize, op: &Operator) {
    use Operator as O;

    if matches!(
        op,
        O::End(_) | O::Else(_) | O::Catch(_) | O::CatchAll(_)
    ) {
        *indent = indent.saturating_sub(1);
    }
    for _ in 0..*indent {
        out.push_str("  ");
    }
    out.push_str(op.mnemonic());

    match op {
        O::Block(imm) | O::Loop(imm) | O::If(imm) | O::Try(imm) => {
            let _ = write!(out, " {:?}", imm.block_type);
        }
        O::Br(imm) | O::BrIf(imm) => {
            let _ = write!(out, " {}", imm.target_depth);
        }
        O::BrTable(imm) => {
            for target in &imm.targets {
                let _ = write!(out, " {target}");
            }
            let _ = write!(out, " {}", imm.default_depth);
        }
        O::Call(imm) => {
            let _ = write!(out, " {}", imm.function_index.as_u32());
        }
        O::RefFunc(imm) => {
            let _ = write!(out, " {}", imm.function_index.as_u32());
        }
        O::CallIndirect(imm) => {
            let _ = write!(
                out,
                " (type {}) {}",
                imm.type_index.as_u32(),
                imm.table_index.as_u32()
            );
        }
        O::LocalGet(imm) | O::LocalSet(imm) | O::LocalTee(imm) | O::GlobalGet(imm)
        | O::GlobalSet(imm) => {
            let _ = write!(out, " {}", imm.index);
        }
        O::I32Const(imm) => {
            let _ = write!(out, " {}", imm.value);
        }
        O::I64Const(imm) => {
            let _ = write!(out, " {}", imm.value);
        }
        O::F32Const(imm) => {
            let _ = write!(out, " {}", imm.value.to_f32());
        }
        O::F64Const(imm) => {
            let _ = write!(out, " {}", imm.value.to_f64());
        }
        O::V128Const(imm) => {
            let _ = write!(out, " {}", imm.value);
        }
        O::I8x16Shuffle(imm) => {
            for lane in imm.lane_indices {
                let _ = write!(out, " {lane}");
            }
        }
        O::Throw(imm) | O::Catch(imm) => {
            let _ = write!(out, " {}", imm.tag_index.as_u32());
        }
        O::Rethrow(imm) => {
            let _ = write!(out, " {}", imm.catch_depth);
        }
        O::SelectTyped(imm) => {
            let _ = write!(out, " (result {})", imm.ty);
        }
        O::RefNull(imm) => {
            let _ = write!(out, " {}", imm.ty);
        }
        O::TableGet(imm) | O::TableSet(imm) | O::TableGrow(imm) | O::TableSize(imm)
        | O::TableFill(imm) => {
            let _ = write!(out, " {}", imm.table_index.as_u32());
        }
        O::TableCopy(imm) => {
            let _ = write!(
                out,
                " {} {}",
                imm.dest_table.as_u32(),
                imm.source_table.as_u32()
            );
        }
        O::TableInit(imm) => {
            let _ = write!(
                out,
                " {} {}",
                imm.elem_index.as_u32(),
                imm.table_index.as_u32()
            );
        }
        O::ElemDrop(imm) => {
            let _ = write!(out, " {}", imm.elem_index.as_u32());
        }
        O::MemoryInit(imm) => {
            let _ = write!(out, " {}", imm.data_index.as_u32());
        }
        O::DataDrop(imm) => {
            let _ = write!(out, " {}", imm.data_index.as_u32());
        }
        _ => {
            if let Some((memory, align_log2, offset)) = op.memarg() {
                if memory.as_u32() != 0 {
                    let _ = write!(out, " (memory {})", memory.as_u32());
                }
                if offset != 0 {
                    let _ = write!(out, " offset={offset}");
                }
                let _ = write!(out, " align={}", 1u64 << align_log2);
                if let Some(lane) = op.lane_index() {
                    let _ = write!(out, " {lane}");
                }
            } else if let Some(lane) = op.lane_index() {
                let _ = write!(out, " {lane}");
            }
        }
    }
    out.push('\n');

    if matches!(
        op,
        O::Block(_) | O::Loop(_) | O::If(_) | O::Else(_) | O::Try(_) | O::Catch(_)
            | O::CatchAll(_)
    ) {
        *indent += 1;
    }
}

fn escape_bytes(out: &mut String, bytes: &[u8]) {
    out.push('"');
    for byte in bytes {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(char::from(*byte)),
            _ => {
                let _ = write!(out, "\\{byte:02x}");
            }
        }
    }
    out.push('"');
}

/// Renders a module as WAST text for diagnostics.
pub fn print_module(module: &Module, names: Option<&DisassemblyNames>) -> String {
    let mut out = String::new();
    out.push_str("(module");
    if let Some(name) = names.and_then(|n| n.module_name.as_deref()) {
        let _ = write!(out, " ${name}");
    }
    out.push('\n');

    for (index, ty) in module.types.iter() {
        let _ = write!(out, "  (type (;{};) (func", index.as_u32());
        write_function_signature(&mut out, *ty);
        out.push_str("))\n");
    }

    for entity in &module.imports {
        let (import_module, name, _) = module.import_info(*entity).unwrap();
        let _ = write!(out, "  (import \"{import_module}\" \"{name}\" ");
        match entity {
            EntityIndex::Function(i) => {
                let _ = write!(
                    out,
                    "(func (type {}))",
                    module.function_type_index(*i).unwrap().as_u32()
                );
            }
            EntityIndex::Table(i) => {
                out.push_str("(table");
                write_table_type(&mut out, module.table_type(*i).unwrap());
                out.push(')');
            }
            EntityIndex::Memory(i) => {
                out.push_str("(memory");
                write_memory_type(&mut out, module.memory_type(*i).unwrap());
                out.push(')');
            }
            EntityIndex::Global(i) => {
                out.push_str("(global");
                write_global_type(&mut out, module.global_type(*i).unwrap());
                out.push(')');
            }
            EntityIndex::Tag(i) => {
                let _ = write!(out, "(tag {})", module.tag_type(*i).unwrap().params);
            }
        }
        out.push_str(")\n");
    }

    for (def_index, def) in module.functions.defs.iter() {
        let flat = module.functions.flat_index(def_index);
        let ty = module.function_type(FuncIndex::from_u32(flat)).unwrap();
        let _ = write!(out, "  (func (;{flat};)");
        if let Some(name) =
            names.and_then(|n| n.function_name(FuncIndex::from_u32(flat)))
        {
            let _ = write!(out, " ${name}");
        }
        write_function_signature(&mut out, ty);
        out.push('\n');
        if !def.locals.is_empty() {
            out.push_str("    (local");
            for local in &def.locals {
                let _ = write!(out, " {local}");
            }
            out.push_str(")\n");
        }

        let mut indent = 2usize;
        for result in OperatorsReader::new(&def.code) {
            match result {
                Ok((_, op)) => write_operator(&mut out, &mut indent, &op),
                Err(error) => {
                    let _ = write!(out, "    ;; malformed body: {error}\n");
                    break;
                }
            }
        }
        out.push_str("  )\n");
    }

    for (_, ty) in module.tables.defs.iter() {
        out.push_str("  (table");
        write_table_type(&mut out, *ty);
        out.push_str(")\n");
    }

    for (_, ty) in module.memories.defs.iter() {
        out.push_str("  (memory");
        write_memory_type(&mut out, *ty);
        out.push_str(")\n");
    }

    for (_, def) in module.globals.defs.iter() {
        out.push_str("  (global");
        write_global_type(&mut out, def.ty);
        let _ = write!(out, " {:?}", def.initializer);
        out.push_str(")\n");
    }

    for (_, ty) in module.tags.defs.iter() {
        let _ = write!(out, "  (tag {})\n", ty.params);
    }

    for export in &module.exports {
        let _ = write!(out, "  (export \"{}\" ", export.name);
        match export.index {
            EntityIndex::Function(i) => {
                let _ = write!(out, "(func {})", i.as_u32());
            }
            EntityIndex::Table(i) => {
                let _ = write!(out, "(table {})", i.as_u32());
            }
            EntityIndex::Memory(i) => {
                let _ = write!(out, "(memory {})", i.as_u32());
            }
            EntityIndex::Global(i) => {
                let _ = write!(out, "(global {})", i.as_u32());
            }
            EntityIndex::Tag(i) => {
                let _ = write!(out, "(tag {})", i.as_u32());
            }
        }
        out.push_str(")\n");
    }

    if let Some(start) = module.start_function {
        let _ = write!(out, "  (start {})\n", start.as_u32());
    }

    for segment in &module.elem_segments {
        out.push_str("  (elem");
        match &segment.kind {
            ElemSegmentKind::Active {
                table_index,
                offset,
            } => {
                if table_index.as_u32() != 0 {
                    let _ = write!(out, " (table {})", table_index.as_u32());
                }
                let _ = write!(out, " (offset {offset:?})");
            }
            ElemSegmentKind::Passive => {}
            ElemSegmentKind::Declared => out.push_str(" declare"),
        }
        match &segment.contents {
            ElemContents::Indices { indices, .. } => {
                out.push_str(" func");
                for index in indices {
                    let _ = write!(out, " {index}");
                }
            }
            ElemContents::Expressions { elem_type, exprs } => {
                let _ = write!(out, " {elem_type}");
                for expr in exprs {
                    match expr {
                        ElemExpr::RefNull(ty) => {
                            let _ = write!(out, " (ref.null {ty})");
                        }
                        ElemExpr::RefFunc(index) => {
                            let _ = write!(out, " (ref.func {})", index.as_u32());
                        }
                    }
                }
            }
        }
        out.push_str(")\n");
    }

    for segment in &module.data_segments {
        out.push_str("  (data");
        if let DataSegmentKind::Active {
            memory_index,
            offset,
        } = &segment.kind
        {
            if memory_index.as_u32() != 0 {
                let _ = write!(out, " (memory {})", memory_index.as_u32());
            }
            let _ = write!(out, " (offset {offset:?})");
        }
        out.push(' ');
        escape_bytes(&mut out, &segment.bytes);
        out.push_str(")\n");
    }

    for section in &module.custom_sections {
        let _ = write!(
            out,
            "  ;; custom section \"{}\": {} bytes\n",
            section.name,
            section.bytes.len()
        );
    }

    out.push(')');
    out
}
