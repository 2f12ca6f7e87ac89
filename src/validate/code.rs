use crate::collections::HashSet;
use crate::errors::ValidationError;
use crate::indices::FuncIndex;
use crate::ir::operators::{BlockType, Operator};
use crate::ir::Module;
use crate::types::{CallingConvention, FunctionType, ReferenceType, TypeTuple, ValueType};
use crate::MAX_CONTROL_DEPTH;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

type Result<T = ()> = core::result::Result<T, ValidationError>;

fn err(message: impl Into<String>) -> ValidationError {
    ValidationError::new(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlKind {
    Function,
    Block,
    IfThen,
    IfElse,
    Loop,
    Try,
    Catch,
    CatchAll,
}

#[derive(Clone, Copy)]
struct ControlContext {
    kind: ControlKind,
    /// Operand stack size outside this frame; the stack never shrinks below
    /// it while the frame is live.
    outer_stack_size: usize,
    params: TypeTuple,
    results: TypeTuple,
    /// The operand types re-pushed when an `else` is entered; for an
    /// if-then this is the if's parameter tuple.
    else_params: TypeTuple,
    is_reachable: bool,
}

/// A single-pass type-checker over a function's operator stream.
///
/// Feed operators with [`CodeValidator::step`]; the validator reports
/// completion through [`CodeValidator::is_finished`] once the function-level
/// `end` has been consumed.
pub struct CodeValidator<'m> {
    module: &'m Module,
    declared: &'m HashSet<FuncIndex>,
    /// Parameters followed by non-parameter locals.
    locals: Vec<ValueType>,
    control: Vec<ControlContext>,
    operands: Vec<ValueType>,
    data_count: Option<u32>,
    finished: bool,
}

impl<'m> CodeValidator<'m> {
    pub fn new(
        module: &'m Module,
        func_type: FunctionType,
        non_param_locals: &[ValueType],
        declared: &'m HashSet<FuncIndex>,
    ) -> Self {
        Self::with_data_count(module, func_type, non_param_locals, declared, None)
    }

    pub fn with_data_count(
        module: &'m Module,
        func_type: FunctionType,
        non_param_locals: &[ValueType],
        declared: &'m HashSet<FuncIndex>,
        data_count: Option<u32>,
    ) -> Self {
        let mut locals = Vec::with_capacity(func_type.params().len() + non_param_locals.len());
        locals.extend_from_slice(func_type.params().elems());
        locals.extend_from_slice(non_param_locals);

        let results = func_type.results();
        let function_frame = ControlContext {
            kind: ControlKind::Function,
            outer_stack_size: 0,
            params: results,
            results,
            else_params: results,
            is_reachable: true,
        };
        Self {
            module,
            declared,
            locals,
            control: alloc::vec![function_frame],
            operands: Vec::new(),
            data_count,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn frame(&self) -> &ControlContext {
        self.control.last().unwrap()
    }

    fn push_operand(&mut self, ty: ValueType) {
        self.operands.push(ty);
    }

    fn push_operands(&mut self, types: &[ValueType]) {
        self.operands.extend_from_slice(types);
    }

    /// Pops one operand. In unreachable regions, popping past the frame base
    /// yields the bottom type, which subtypes anything.
    fn pop_operand(&mut self, op_name: &str) -> Result<ValueType> {
        let frame = self.frame();
        if self.operands.len() == frame.outer_stack_size {
            if !frame.is_reachable {
                return Ok(ValueType::None);
            }
            return Err(err(format!(
                "type mismatch: expected an operand but stack was empty in {op_name}"
            )));
        }
        Ok(self.operands.pop().unwrap())
    }

    fn pop_operand_expecting(&mut self, expected: ValueType, op_name: &str) -> Result<ValueType> {
        let frame = self.frame();
        if self.operands.len() == frame.outer_stack_size {
            if !frame.is_reachable {
                return Ok(ValueType::None);
            }
            return Err(err(format!(
                "type mismatch: expected {expected} but stack was empty in {op_name} operand"
            )));
        }
        let actual = self.operands.pop().unwrap();
        if !ValueType::is_subtype(actual, expected) {
            return Err(err(format!(
                "type mismatch: expected {expected} but got {actual} in {op_name} operand"
            )));
        }
        Ok(actual)
    }

    fn pop_operands_expecting(&mut self, expected: &[ValueType], op_name: &str) -> Result {
        for ty in expected.iter().rev() {
            self.pop_operand_expecting(*ty, op_name)?;
        }
        Ok(())
    }

    fn mark_unreachable(&mut self) {
        let frame = self.control.last_mut().unwrap();
        frame.is_reachable = false;
        let base = frame.outer_stack_size;
        self.operands.truncate(base);
    }

    fn resolve_block_type(&self, block_type: BlockType) -> Result<(TypeTuple, TypeTuple)> {
        match block_type {
            BlockType::Empty => Ok((TypeTuple::empty(), TypeTuple::empty())),
            BlockType::Value(ty) => Ok((TypeTuple::empty(), TypeTuple::new([ty]))),
            BlockType::FunctionType(index) => {
                let Some(ty) = self.module.type_at(index) else {
                    return Err(err(format!(
                        "block type references invalid type index {}",
                        index.as_u32()
                    )));
                };
                if ty.calling_convention() != CallingConvention::Wasm {
                    return Err(err("block types must use the wasm calling convention"));
                }
                if (!ty.params().is_empty() || ty.results().len() > 1)
                    && !self.module.features.multiple_results_and_block_params
                {
                    return Err(err(
                        "block parameters and multiple results require the multi-value feature",
                    ));
                }
                Ok((ty.params(), ty.results()))
            }
        }
    }

    fn push_control(
        &mut self,
        kind: ControlKind,
        params: TypeTuple,
        results: TypeTuple,
        else_params: TypeTuple,
    ) -> Result {
        if self.control.len() >= MAX_CONTROL_DEPTH {
            return Err(err("control stack depth limit exceeded"));
        }
        self.control.push(ControlContext {
            kind,
            outer_stack_size: self.operands.len(),
            params,
            results,
            else_params,
            is_reachable: true,
        });
        self.push_operands(params.elems());
        Ok(())
    }

    /// Checks that the operand stack holds exactly the frame's results above
    /// its base, popping them. The frame itself stays on the control stack.
    fn check_frame_exit(&mut self, op_name: &str) -> Result {
        let results = self.frame().results;
        self.pop_operands_expecting(results.elems(), op_name)?;
        let frame = self.frame();
        if self.operands.len() != frame.outer_stack_size {
            return Err(err(format!(
                "type mismatch: {} superfluous operand(s) on the stack at {op_name}",
                self.operands.len() - frame.outer_stack_size
            )));
        }
        Ok(())
    }

    /// The operand types a branch to `depth` must provide: a loop's
    /// parameters, any other frame's results.
    fn branch_target_types(&self, depth: u32, op_name: &str) -> Result<TypeTuple> {
        let depth = depth as usize;
        if depth >= self.control.len() {
            return Err(err(format!(
                "{op_name} target depth {depth} exceeds the control stack depth"
            )));
        }
        let frame = &self.control[self.control.len() - 1 - depth];
        Ok(match frame.kind {
            ControlKind::Loop => frame.params,
            _ => frame.results,
        })
    }

    fn local_type(&self, index: u32, op_name: &str) -> Result<ValueType> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or_else(|| err(format!("{op_name} references invalid local index {index}")))
    }

    /// Type-checks one operator and updates the control and operand stacks.
    pub fn step(&mut self, op: &Operator) -> Result {
        use Operator as O;

        if self.finished {
            return Err(err("operators after the function-level end"));
        }
        if !op.is_enabled(&self.module.features) {
            return Err(err(format!(
                "{} is not allowed by the module's feature spec",
                op.mnemonic()
            )));
        }

        // Alignment, offset, and lane-index rules shared by every memory
        // access.
        if let Some((memory_index, align_log2, offset)) = op.memarg() {
            if let Some(natural) = op.natural_alignment_log2() {
                if op.requires_exact_alignment() {
                    if align_log2 != natural {
                        return Err(err(format!(
                            "{} must use its natural alignment of {natural}",
                            op.mnemonic()
                        )));
                    }
                } else if align_log2 > natural {
                    return Err(err(format!(
                        "{} alignment 2^{align_log2} exceeds its natural alignment 2^{natural}",
                        op.mnemonic()
                    )));
                }
            }
            if let Some(memory) = self.module.memory_type(memory_index) {
                if memory.index_type == crate::types::IndexType::I32
                    && offset > u64::from(u32::MAX)
                {
                    return Err(err(format!(
                        "{} offset {offset} exceeds the 32-bit address space",
                        op.mnemonic()
                    )));
                }
            }
        }
        if let Some(num_lanes) = op.num_lanes() {
            if let O::I8x16Shuffle(imm) = op {
                for lane in imm.lane_indices {
                    if lane >= 32 {
                        return Err(err(format!("shuffle lane index {lane} out of range")));
                    }
                }
            } else if let Some(lane) = op.lane_index() {
                if lane >= num_lanes {
                    return Err(err(format!(
                        "{} lane index {lane} out of range (must be < {num_lanes})",
                        op.mnemonic()
                    )));
                }
            }
        }

        match op {
            O::Unreachable(_) => self.mark_unreachable(),
            O::Nop(_) => {}

            O::Block(imm) => {
                let (params, results) = self.resolve_block_type(imm.block_type)?;
                self.pop_operands_expecting(params.elems(), "block")?;
                self.push_control(ControlKind::Block, params, results, params)?;
            }
            O::Loop(imm) => {
                let (params, results) = self.resolve_block_type(imm.block_type)?;
                self.pop_operands_expecting(params.elems(), "loop")?;
                self.push_control(ControlKind::Loop, params, results, params)?;
            }
            O::If(imm) => {
                let (params, results) = self.resolve_block_type(imm.block_type)?;
                self.pop_operand_expecting(ValueType::I32, "if")?;
                self.pop_operands_expecting(params.elems(), "if")?;
                self.push_control(ControlKind::IfThen, params, results, params)?;
            }
            O::Else(_) => {
                if self.frame().kind != ControlKind::IfThen {
                    return Err(err("else without a matching if"));
                }
                self.check_frame_exit("else")?;
                let frame = self.control.last_mut().unwrap();
                frame.kind = ControlKind::IfElse;
                frame.is_reachable = true;
                let else_params = frame.else_params;
                self.push_operands(else_params.elems());
            }
            O::Try(imm) => {
                let (params, results) = self.resolve_block_type(imm.block_type)?;
                self.pop_operands_expecting(params.elems(), "try")?;
                self.push_control(ControlKind::Try, params, results, params)?;
            }
            O::Catch(imm) => {
                if !matches!(
                    self.frame().kind,
                    ControlKind::Try | ControlKind::Catch
                ) {
                    return Err(err("catch without a matching try"));
                }
                let Some(tag) = self.module.tag_type(imm.tag_index) else {
                    return Err(err(format!(
                        "catch references invalid exception type index {}",
                        imm.tag_index.as_u32()
                    )));
                };
                self.check_frame_exit("catch")?;
                let frame = self.control.last_mut().unwrap();
                frame.kind = ControlKind::Catch;
                frame.is_reachable = true;
                self.push_operands(tag.params.elems());
            }
            O::CatchAll(_) => {
                if !matches!(
                    self.frame().kind,
                    ControlKind::Try | ControlKind::Catch
                ) {
                    return Err(err("catch_all without a matching try"));
                }
                self.check_frame_exit("catch_all")?;
                let frame = self.control.last_mut().unwrap();
                frame.kind = ControlKind::CatchAll;
                frame.is_reachable = true;
            }
            O::Throw(imm) => {
                let Some(tag) = self.module.tag_type(imm.tag_index) else {
                    return Err(err(format!(
                        "throw references invalid exception type index {}",
                        imm.tag_index.as_u32()
                    )));
                };
                self.pop_operands_expecting(tag.params.elems(), "throw")?;
                self.mark_unreachable();
            }
            O::Rethrow(imm) => {
                let depth = imm.catch_depth as usize;
                if depth >= self.control.len() {
                    return Err(err("rethrow target depth exceeds the control stack depth"));
                }
                let frame = &self.control[self.control.len() - 1 - depth];
                if !matches!(frame.kind, ControlKind::Catch | ControlKind::CatchAll) {
                    return Err(err("rethrow must target a catch or catch_all frame"));
                }
                self.mark_unreachable();
            }
            O::End(_) => {
                let frame = *self.frame();
                if frame.kind == ControlKind::Try {
                    return Err(err("end inside a try frame; catch or catch_all first"));
                }
                if frame.kind == ControlKind::IfThen && frame.else_params != frame.results {
                    return Err(err(
                        "type mismatch: an if without an else must have the same parameter and result types",
                    ));
                }
                self.check_frame_exit("end")?;
                self.control.pop();
                if self.control.is_empty() {
                    self.finished = true;
                } else {
                    self.push_operands(frame.results.elems());
                }
            }

            O::Br(imm) => {
                let target = self.branch_target_types(imm.target_depth, "br")?;
                self.pop_operands_expecting(target.elems(), "br")?;
                self.mark_unreachable();
            }
            O::BrIf(imm) => {
                self.pop_operand_expecting(ValueType::I32, "br_if")?;
                let target = self.branch_target_types(imm.target_depth, "br_if")?;
                self.pop_operands_expecting(target.elems(), "br_if")?;
                self.push_operands(target.elems());
            }
            O::BrTable(imm) => {
                self.pop_operand_expecting(ValueType::I32, "br_table")?;
                let default = self.branch_target_types(imm.default_depth, "br_table")?;
                for target in &imm.targets {
                    let types = self.branch_target_types(*target, "br_table")?;
                    if types != default {
                        return Err(err(
                            "type mismatch: br_table targets have inconsistent types",
                        ));
                    }
                }
                self.pop_operands_expecting(default.elems(), "br_table")?;
                self.mark_unreachable();
            }
            O::Return(_) => {
                let results = self.control[0].results;
                self.pop_operands_expecting(results.elems(), "return")?;
                self.mark_unreachable();
            }

            O::Call(imm) => {
                let Some(ty) = self.module.function_type(imm.function_index) else {
                    return Err(err(format!(
                        "call references invalid function index {}",
                        imm.function_index.as_u32()
                    )));
                };
                self.pop_operands_expecting(ty.params().elems(), "call")?;
                self.push_operands(ty.results().elems());
            }
            O::CallIndirect(imm) => {
                let Some(ty) = self.module.type_at(imm.type_index) else {
                    return Err(err(format!(
                        "call_indirect references invalid type index {}",
                        imm.type_index.as_u32()
                    )));
                };
                let Some(table) = self.module.table_type(imm.table_index) else {
                    return Err(err(format!(
                        "call_indirect references invalid table index {}",
                        imm.table_index.as_u32()
                    )));
                };
                if table.element_type != ReferenceType::FuncRef {
                    return Err(err("call_indirect requires a table of funcref"));
                }
                self.pop_operand_expecting(table.index_type.value_type(), "call_indirect")?;
                self.pop_operands_expecting(ty.params().elems(), "call_indirect")?;
                self.push_operands(ty.results().elems());
            }

            O::Drop(_) => {
                self.pop_operand("drop")?;
            }
            O::Select(_) => {
                self.pop_operand_expecting(ValueType::I32, "select")?;
                let first = self.pop_operand("select")?;
                let second = self.pop_operand("select")?;
                if first.is_reference() || second.is_reference() {
                    return Err(err(
                        "type mismatch: untyped select may not operate on reference types",
                    ));
                }
                let result = match (first, second) {
                    (ValueType::None, other) | (other, ValueType::None) => other,
                    (a, b) if a == b => a,
                    (a, b) => {
                        return Err(err(format!(
                            "type mismatch: select operands {a} and {b} do not match"
                        )))
                    }
                };
                self.push_operand(result);
            }
            O::SelectTyped(imm) => {
                self.pop_operand_expecting(ValueType::I32, "select")?;
                self.pop_operand_expecting(imm.ty, "select")?;
                self.pop_operand_expecting(imm.ty, "select")?;
                self.push_operand(imm.ty);
            }

            O::LocalGet(imm) => {
                let ty = self.local_type(imm.index, "local.get")?;
                self.push_operand(ty);
            }
            O::LocalSet(imm) => {
                let ty = self.local_type(imm.index, "local.set")?;
                self.pop_operand_expecting(ty, "local.set")?;
            }
            O::LocalTee(imm) => {
                let ty = self.local_type(imm.index, "local.tee")?;
                self.pop_operand_expecting(ty, "local.tee")?;
                self.push_operand(ty);
            }
            O::GlobalGet(imm) => {
                let index = crate::indices::GlobalIndex::from_u32(imm.index);
                let Some(ty) = self.module.global_type(index) else {
                    return Err(err(format!(
                        "global.get references invalid global index {}",
                        imm.index
                    )));
                };
                self.push_operand(ty.value_type);
            }
            O::GlobalSet(imm) => {
                let index = crate::indices::GlobalIndex::from_u32(imm.index);
                let Some(ty) = self.module.global_type(index) else {
                    return Err(err(format!(
                        "global.set references invalid global index {}",
                        imm.index
                    )));
                };
                if !ty.is_mutable {
                    return Err(err("global.set of an immutable global"));
                }
                self.pop_operand_expecting(ty.value_type, "global.set")?;
            }

            O::RefIsNull(_) => {
                let ty = self.pop_operand("ref.is_null")?;
                if !ty.is_reference() && ty != ValueType::None {
                    return Err(err(format!(
                        "type mismatch: expected a reference but got {ty} in ref.is_null operand"
                    )));
                }
                self.push_operand(ValueType::I32);
            }
            O::RefFunc(imm) => {
                if self.module.function_type(imm.function_index).is_none() {
                    return Err(err(format!(
                        "ref.func references invalid function index {}",
                        imm.function_index.as_u32()
                    )));
                }
                if !self.declared.contains(&imm.function_index) {
                    return Err(err(format!(
                        "ref.func references undeclared function index {}",
                        imm.function_index.as_u32()
                    )));
                }
                self.push_operand(ValueType::FuncRef);
            }

            O::MemoryInit(imm) => {
                self.check_data_index(imm.data_index.as_u32(), "memory.init")?;
                self.apply_signature(op)?;
            }
            O::DataDrop(imm) => {
                self.check_data_index(imm.data_index.as_u32(), "data.drop")?;
            }
            O::TableInit(imm) => {
                if imm.elem_index.as_u32() as usize >= self.module.elem_segments.len() {
                    return Err(err(format!(
                        "table.init references invalid element segment {}",
                        imm.elem_index.as_u32()
                    )));
                }
                self.apply_signature(op)?;
            }
            O::ElemDrop(imm) => {
                if imm.elem_index.as_u32() as usize >= self.module.elem_segments.len() {
                    return Err(err(format!(
                        "elem.drop references invalid element segment {}",
                        imm.elem_index.as_u32()
                    )));
                }
            }

            _ => self.apply_signature(op)?,
        }
        Ok(())
    }

    fn apply_signature(&mut self, op: &Operator) -> Result {
        let Some(sig) = op.signature(self.module)? else {
            return Err(err(format!(
                "internal error: {} has no computed signature",
                op.mnemonic()
            )));
        };
        self.pop_operands_expecting(&sig.params, op.mnemonic())?;
        self.push_operands(&sig.results);
        Ok(())
    }

    fn check_data_index(&self, index: u32, op_name: &str) -> Result {
        let Some(count) = self.data_count else {
            return Err(err(format!(
                "{op_name} requires a data count section"
            )));
        };
        if index >= count {
            return Err(err(format!(
                "{op_name} references invalid data segment {index}"
            )));
        }
        Ok(())
    }
}
