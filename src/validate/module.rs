use super::code::CodeValidator;
use crate::binary::OperatorsReader;
use crate::collections::HashSet;
use crate::errors::ValidationError;
use crate::indices::{EntityIndex, FuncIndex, GlobalIndex};
use crate::ir::{ConstExpr, ElemContents, ElemSegmentKind, DataSegmentKind, FeatureSpec, Module};
use crate::types::{
    CallingConvention, ExternKind, GlobalType, MemoryType, ReferenceType, SizeConstraints,
    TableType, TagType, ValueType,
};
use crate::{WASM32_MAX_PAGES, WASM64_MAX_PAGES};
use alloc::format;
use alloc::string::String;

type Result<T = ()> = core::result::Result<T, ValidationError>;

fn err(message: impl Into<String>) -> ValidationError {
    ValidationError::new(message)
}

fn check_value_type(features: &FeatureSpec, ty: ValueType, context: &str) -> Result {
    match ty {
        ValueType::V128 if !features.simd => {
            Err(err(format!("v128 in {context} requires the simd feature")))
        }
        ValueType::FuncRef | ValueType::ExternRef if !features.reference_types => Err(err(
            format!("{ty} in {context} requires the reference-types feature"),
        )),
        ValueType::None | ValueType::Any => {
            Err(err(format!("{ty} is not a concrete type ({context})")))
        }
        _ => Ok(()),
    }
}

fn check_size_constraints(size: SizeConstraints, context: &str) -> Result {
    if size.min > size.max {
        return Err(err(format!(
            "{context} minimum {} exceeds maximum {}",
            size.min, size.max
        )));
    }
    Ok(())
}

fn check_table_type(features: &FeatureSpec, ty: TableType) -> Result {
    if ty.element_type == ReferenceType::ExternRef && !features.reference_types {
        return Err(err(
            "externref tables require the reference-types feature",
        ));
    }
    if ty.shared {
        if !features.shared_tables {
            return Err(err("shared tables require the shared-tables feature"));
        }
        if !ty.size.is_bounded() {
            return Err(err("shared tables must have a bounded maximum size"));
        }
    }
    if ty.index_type == crate::types::IndexType::I64 && !features.table64 {
        return Err(err("64-bit tables require the table64 feature"));
    }
    check_size_constraints(ty.size, "table size")
}

fn check_memory_type(features: &FeatureSpec, ty: MemoryType) -> Result {
    if ty.shared {
        if !features.atomics {
            return Err(err("shared memories require the atomics feature"));
        }
        if !ty.size.is_bounded() {
            return Err(err("shared memories must have a bounded maximum size"));
        }
    }
    let max_pages = match ty.index_type {
        crate::types::IndexType::I32 => WASM32_MAX_PAGES,
        crate::types::IndexType::I64 => {
            if !features.memory64 {
                return Err(err("64-bit memories require the memory64 feature"));
            }
            WASM64_MAX_PAGES
        }
    };
    if ty.size.min > max_pages {
        return Err(err(format!(
            "memory minimum size {} exceeds the index space ({max_pages} pages)",
            ty.size.min
        )));
    }
    if ty.size.is_bounded() && ty.size.max > max_pages {
        return Err(err(format!(
            "memory maximum size {} exceeds the index space ({max_pages} pages)",
            ty.size.max
        )));
    }
    check_size_constraints(ty.size, "memory size")
}

fn check_global_type(features: &FeatureSpec, ty: GlobalType) -> Result {
    check_value_type(features, ty.value_type, "global type")
}

fn check_tag_type(features: &FeatureSpec, ty: TagType) -> Result {
    if !features.exception_handling {
        return Err(err(
            "exception types require the exception-handling feature",
        ));
    }
    for param in ty.params.elems() {
        check_value_type(features, *param, "exception type parameter")?;
    }
    Ok(())
}

pub fn validate_types(module: &Module) -> Result {
    for (index, ty) in module.types.iter() {
        for param in ty.params().elems() {
            check_value_type(&module.features, *param, "function type parameter")?;
        }
        for result in ty.results().elems() {
            check_value_type(&module.features, *result, "function type result")?;
        }
        if ty.results().len() > 1 && !module.features.multiple_results_and_block_params {
            return Err(err(format!(
                "type {} has multiple results, which requires the multi-value feature",
                index.as_u32()
            )));
        }
    }
    Ok(())
}

pub fn validate_imports(module: &Module) -> Result {
    let features = &module.features;
    for import in &module.functions.imports {
        if module.type_at(import.ty).is_none() {
            return Err(err(format!(
                "function import {}.{} references invalid type index {}",
                import.module,
                import.name,
                import.ty.as_u32()
            )));
        }
    }
    for import in &module.tables.imports {
        check_table_type(features, import.ty)?;
    }
    for import in &module.memories.imports {
        check_memory_type(features, import.ty)?;
    }
    for import in &module.globals.imports {
        check_global_type(features, import.ty)?;
        if import.ty.is_mutable && !features.import_export_mutable_globals {
            return Err(err(format!(
                "mutable global import {}.{} requires the import/export mutable globals feature",
                import.module, import.name
            )));
        }
    }
    for import in &module.tags.imports {
        check_tag_type(features, import.ty)?;
    }
    Ok(())
}

pub fn validate_function_declarations(module: &Module) -> Result {
    for (index, def) in module.functions.defs.iter() {
        let Some(ty) = module.type_at(def.type_index) else {
            return Err(err(format!(
                "function {} references invalid type index {}",
                index.as_u32(),
                def.type_index.as_u32()
            )));
        };
        if ty.calling_convention() != CallingConvention::Wasm {
            return Err(err(format!(
                "function {} must have a wasm calling convention",
                index.as_u32()
            )));
        }
    }
    Ok(())
}

pub fn validate_tables(module: &Module) -> Result {
    for (_, ty) in module.tables.defs.iter() {
        check_table_type(&module.features, *ty)?;
    }
    if module.tables.len() > 1 && !module.features.multiple_tables {
        return Err(err(
            "multiple tables require the multiple-tables feature",
        ));
    }
    Ok(())
}

pub fn validate_memories(module: &Module) -> Result {
    for (_, ty) in module.memories.defs.iter() {
        check_memory_type(&module.features, *ty)?;
    }
    if module.memories.len() > 1 && !module.features.multiple_memories {
        return Err(err(
            "multiple memories require the multiple-memories feature",
        ));
    }
    Ok(())
}

/// Checks an initializer expression against its expected type.
///
/// `global.get` may only reference imported, immutable globals.
fn check_const_expr(
    module: &Module,
    expr: &ConstExpr,
    expected: ValueType,
    context: &str,
) -> Result {
    match expr {
        ConstExpr::GlobalGet(index) => {
            if !module.globals.is_import(index.as_u32()) {
                return Err(err(format!(
                    "{context} initializer may only reference imported globals"
                )));
            }
            let ty = module.global_type(*index).unwrap();
            if ty.is_mutable {
                return Err(err(format!(
                    "{context} initializer may only reference immutable globals"
                )));
            }
            if !ValueType::is_subtype(ty.value_type, expected) {
                return Err(err(format!(
                    "type mismatch: {context} initializer has type {} but {expected} was expected",
                    ty.value_type
                )));
            }
        }
        ConstExpr::RefFunc(index) => {
            if module.function_type(*index).is_none() {
                return Err(err(format!(
                    "{context} initializer references invalid function index {}",
                    index.as_u32()
                )));
            }
            if !ValueType::is_subtype(ValueType::FuncRef, expected) {
                return Err(err(format!(
                    "type mismatch: {context} initializer has type funcref but {expected} was expected"
                )));
            }
        }
        _ => {
            let actual = expr.result_type(|_| None).unwrap();
            if actual == ValueType::V128 && !module.features.simd {
                return Err(err(format!(
                    "v128 in {context} initializer requires the simd feature"
                )));
            }
            if !ValueType::is_subtype(actual, expected) {
                return Err(err(format!(
                    "type mismatch: {context} initializer has type {actual} but {expected} was expected"
                )));
            }
        }
    }
    Ok(())
}

pub fn validate_globals(module: &Module) -> Result {
    for (index, def) in module.globals.defs.iter() {
        check_global_type(&module.features, def.ty)?;
        check_const_expr(
            module,
            &def.initializer,
            def.ty.value_type,
            &format!("global {}", module.globals.flat_index(index)),
        )?;
    }
    Ok(())
}

pub fn validate_tags(module: &Module) -> Result {
    for (_, ty) in module.tags.defs.iter() {
        check_tag_type(&module.features, *ty)?;
    }
    Ok(())
}

pub fn validate_exports(module: &Module) -> Result {
    let mut names: HashSet<&str> = HashSet::new();
    for export in &module.exports {
        if !names.add(export.name.as_str()) {
            return Err(err(format!("duplicate export name {:?}", export.name)));
        }
        let Some(_) = module.extern_type(export.index) else {
            return Err(err(format!(
                "export {:?} references an out-of-range index",
                export.name
            )));
        };
        if let EntityIndex::Global(index) = export.index {
            let ty = module.global_type(index).unwrap();
            if ty.is_mutable && !module.features.import_export_mutable_globals {
                return Err(err(format!(
                    "mutable global export {:?} requires the import/export mutable globals feature",
                    export.name
                )));
            }
        }
    }
    Ok(())
}

pub fn validate_start(module: &Module) -> Result {
    let Some(index) = module.start_function else {
        return Ok(());
    };
    let Some(ty) = module.function_type(index) else {
        return Err(err(format!(
            "start function index {} is out of range",
            index.as_u32()
        )));
    };
    if !ty.params().is_empty() || !ty.results().is_empty() {
        return Err(err("start function must have the signature () -> ()"));
    }
    Ok(())
}

pub fn validate_elem_segments(module: &Module) -> Result {
    for (i, segment) in module.elem_segments.iter().enumerate() {
        let elem_type = segment.contents.element_type();
        if let ElemSegmentKind::Active {
            table_index,
            offset,
        } = &segment.kind
        {
            let Some(table) = module.table_type(*table_index) else {
                return Err(err(format!(
                    "element segment {i} references invalid table index {}",
                    table_index.as_u32()
                )));
            };
            if !ValueType::is_subtype(elem_type.into(), table.element_type.into()) {
                return Err(err(format!(
                    "element segment {i} has element type {elem_type} but its table holds {}",
                    table.element_type
                )));
            }
            check_const_expr(
                module,
                offset,
                table.index_type.value_type(),
                &format!("element segment {i} offset"),
            )?;
        }
        match &segment.contents {
            ElemContents::Indices { kind, indices } => {
                if *kind != ExternKind::Function {
                    return Err(err(format!(
                        "element segment {i} has unsupported element kind {kind}"
                    )));
                }
                for index in indices {
                    if module.function_type(FuncIndex::from_u32(*index)).is_none() {
                        return Err(err(format!(
                            "element segment {i} references invalid function index {index}"
                        )));
                    }
                }
            }
            ElemContents::Expressions { exprs, .. } => {
                for expr in exprs {
                    if let crate::ir::ElemExpr::RefFunc(index) = expr {
                        if module.function_type(*index).is_none() {
                            return Err(err(format!(
                                "element segment {i} references invalid function index {}",
                                index.as_u32()
                            )));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

pub fn validate_data_segments(module: &Module) -> Result {
    for (i, segment) in module.data_segments.iter().enumerate() {
        match &segment.kind {
            DataSegmentKind::Active {
                memory_index,
                offset,
            } => {
                let Some(memory) = module.memory_type(*memory_index) else {
                    return Err(err(format!(
                        "data segment {i} references invalid memory index {}",
                        memory_index.as_u32()
                    )));
                };
                check_const_expr(
                    module,
                    offset,
                    memory.index_type.value_type(),
                    &format!("data segment {i} offset"),
                )?;
            }
            DataSegmentKind::Passive => {
                if !module.features.bulk_memory_operations {
                    return Err(err(format!(
                        "passive data segment {i} requires the bulk memory feature"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// The set of functions that may be the operand of `ref.func`: those that
/// appear in the module's imports, exports, element segments, or global
/// initializers.
pub fn declared_functions(module: &Module) -> HashSet<FuncIndex> {
    let mut declared = HashSet::new();
    for index in 0..module.functions.imports.len() {
        declared.add(FuncIndex::from_u32(u32::try_from(index).unwrap()));
    }
    for export in &module.exports {
        if let EntityIndex::Function(index) = export.index {
            declared.add(index);
        }
    }
    for (_, def) in module.globals.defs.iter() {
        if let Some(index) = def.initializer.referenced_function() {
            declared.add(index);
        }
    }
    for segment in &module.elem_segments {
        match &segment.contents {
            ElemContents::Indices { indices, .. } => {
                for index in indices {
                    declared.add(FuncIndex::from_u32(*index));
                }
            }
            ElemContents::Expressions { exprs, .. } => {
                for expr in exprs {
                    if let crate::ir::ElemExpr::RefFunc(index) = expr {
                        declared.add(*index);
                    }
                }
            }
        }
    }
    declared
}

/// Runs every module-level rule and validates every function body. Used for
/// modules constructed directly in IR form; decoded modules are validated
/// incrementally as sections arrive.
pub fn validate_module(module: &Module) -> Result {
    validate_types(module)?;
    validate_imports(module)?;
    validate_function_declarations(module)?;
    validate_tables(module)?;
    validate_memories(module)?;
    validate_globals(module)?;
    validate_tags(module)?;
    validate_exports(module)?;
    validate_start(module)?;
    validate_elem_segments(module)?;
    validate_data_segments(module)?;

    let declared = declared_functions(module);
    let data_count = u32::try_from(module.data_segments.len()).unwrap();
    for (index, def) in module.functions.defs.iter() {
        let func_type = module.type_at(def.type_index).unwrap();
        let mut validator =
            CodeValidator::with_data_count(module, func_type, &def.locals, &declared, Some(data_count));
        let mut ops = OperatorsReader::new(&def.code);
        loop {
            let (_, op) = ops
                .read()
                .map_err(|e| err(format!("function {}: {e}", index.as_u32())))?;
            validator.step(&op)?;
            if validator.is_finished() {
                break;
            }
        }
        if !ops.is_at_end() {
            return Err(err(format!(
                "function {} has trailing bytes after the final end",
                index.as_u32()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GlobalDef, Import};

    #[test]
    fn mutable_global_import_requires_feature() {
        let mut features = FeatureSpec::standard();
        features.import_export_mutable_globals = false;
        let mut module = Module::new(features);
        module.globals.imports.push(Import {
            module: "env".into(),
            name: "x".into(),
            ty: GlobalType {
                value_type: ValueType::I32,
                is_mutable: true,
            },
        });
        module
            .imports
            .push(EntityIndex::Global(GlobalIndex::from_u32(0)));
        let error = validate_imports(&module).unwrap_err();
        assert!(error.message.contains("mutable global import"));
    }

    #[test]
    fn global_initializer_must_reference_imported_immutable_globals() {
        let mut module = Module::new(FeatureSpec::standard());
        module.globals.defs.push(GlobalDef {
            ty: GlobalType {
                value_type: ValueType::I32,
                is_mutable: false,
            },
            initializer: ConstExpr::GlobalGet(GlobalIndex::from_u32(0)),
        });
        assert!(validate_globals(&module).is_err());
    }

    #[test]
    fn duplicate_export_names_are_rejected() {
        let mut module = Module::new(FeatureSpec::standard());
        module.memories.defs.push(MemoryType {
            shared: false,
            index_type: crate::types::IndexType::I32,
            size: SizeConstraints { min: 1, max: 1 },
        });
        let export = crate::ir::Export {
            name: "m".into(),
            index: EntityIndex::Memory(crate::indices::MemoryIndex::from_u32(0)),
        };
        module.exports.push(export.clone());
        module.exports.push(export);
        assert!(validate_exports(&module).is_err());
    }
}
