//! Per-operator signatures. Monomorphic operators have a fixed signature;
//! memory and table operators are polymorphic over the index type of the
//! memory or table named by their immediates.

use crate::errors::ValidationError;
use crate::indices::{MemoryIndex, TableIndex};
use crate::ir::operators::Operator;
use crate::ir::Module;
use crate::types::ValueType;
use alloc::borrow::Cow;
use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

/// The operand and result types of one operator.
#[derive(Debug, Clone)]
pub struct OpSignature {
    pub params: Cow<'static, [ValueType]>,
    pub results: Cow<'static, [ValueType]>,
}

impl OpSignature {
    fn fixed(params: &'static [ValueType], results: &'static [ValueType]) -> Self {
        Self {
            params: Cow::Borrowed(params),
            results: Cow::Borrowed(results),
        }
    }

    fn owned(params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        Self {
            params: Cow::Owned(params),
            results: Cow::Owned(results),
        }
    }
}

use ValueType::{FuncRef, F32, F64, I32, I64, V128};

fn memory_address_type(
    module: &Module,
    index: MemoryIndex,
) -> Result<ValueType, ValidationError> {
    module
        .memory_type(index)
        .map(|ty| ty.index_type.value_type())
        .ok_or_else(|| {
            ValidationError::new(format!("invalid memory index {}", index.as_u32()))
        })
}

fn table_address_type(module: &Module, index: TableIndex) -> Result<ValueType, ValidationError> {
    module
        .table_type(index)
        .map(|ty| ty.index_type.value_type())
        .ok_or_else(|| ValidationError::new(format!("invalid table index {}", index.as_u32())))
}

fn table_element_type(module: &Module, index: TableIndex) -> Result<ValueType, ValidationError> {
    module
        .table_type(index)
        .map(|ty| ty.element_type.into())
        .ok_or_else(|| ValidationError::new(format!("invalid table index {}", index.as_u32())))
}

/// The address type of a copy length operand: i32 if either side is i32.
fn min_address_type(a: ValueType, b: ValueType) -> ValueType {
    if a == I32 || b == I32 {
        I32
    } else {
        I64
    }
}

impl Operator {
    /// Computes the operator's signature against `module`'s memory and table
    /// types. Returns `None` for operators whose typing is structural
    /// (control flow, variables, calls, parametrics) and therefore handled
    /// directly by the validator.
    pub fn signature(&self, module: &Module) -> Result<Option<OpSignature>, ValidationError> {
        use Operator as O;

        let sig = match self {
            // Constants.
            O::I32Const(_) => OpSignature::fixed(&[], &[I32]),
            O::I64Const(_) => OpSignature::fixed(&[], &[I64]),
            O::F32Const(_) => OpSignature::fixed(&[], &[F32]),
            O::F64Const(_) => OpSignature::fixed(&[], &[F64]),
            O::V128Const(_) => OpSignature::fixed(&[], &[V128]),

            // i32 comparisons and arithmetic.
            O::I32Eqz(_) => OpSignature::fixed(&[I32], &[I32]),
            O::I32Eq(_) | O::I32Ne(_) | O::I32LtS(_) | O::I32LtU(_) | O::I32GtS(_)
            | O::I32GtU(_) | O::I32LeS(_) | O::I32LeU(_) | O::I32GeS(_) | O::I32GeU(_)
            | O::I32Add(_) | O::I32Sub(_) | O::I32Mul(_) | O::I32DivS(_) | O::I32DivU(_)
            | O::I32RemS(_) | O::I32RemU(_) | O::I32And(_) | O::I32Or(_) | O::I32Xor(_)
            | O::I32Shl(_) | O::I32ShrS(_) | O::I32ShrU(_) | O::I32Rotl(_) | O::I32Rotr(_) => {
                OpSignature::fixed(&[I32, I32], &[I32])
            }
            O::I32Clz(_) | O::I32Ctz(_) | O::I32Popcnt(_) | O::I32Extend8S(_)
            | O::I32Extend16S(_) => OpSignature::fixed(&[I32], &[I32]),

            // i64 comparisons and arithmetic.
            O::I64Eqz(_) => OpSignature::fixed(&[I64], &[I32]),
            O::I64Eq(_) | O::I64Ne(_) | O::I64LtS(_) | O::I64LtU(_) | O::I64GtS(_)
            | O::I64GtU(_) | O::I64LeS(_) | O::I64LeU(_) | O::I64GeS(_) | O::I64GeU(_) => {
                OpSignature::fixed(&[I64, I64], &[I32])
            }
            O::I64Add(_) | O::I64Sub(_) | O::I64Mul(_) | O::I64DivS(_) | O::I64DivU(_)
            | O::I64RemS(_) | O::I64RemU(_) | O::I64And(_) | O::I64Or(_) | O::I64Xor(_)
            | O::I64Shl(_) | O::I64ShrS(_) | O::I64ShrU(_) | O::I64Rotl(_) | O::I64Rotr(_) => {
                OpSignature::fixed(&[I64, I64], &[I64])
            }
            O::I64Clz(_) | O::I64Ctz(_) | O::I64Popcnt(_) | O::I64Extend8S(_)
            | O::I64Extend16S(_) | O::I64Extend32S(_) => OpSignature::fixed(&[I64], &[I64]),

            // Float comparisons and arithmetic.
            O::F32Eq(_) | O::F32Ne(_) | O::F32Lt(_) | O::F32Gt(_) | O::F32Le(_) | O::F32Ge(_) => {
                OpSignature::fixed(&[F32, F32], &[I32])
            }
            O::F64Eq(_) | O::F64Ne(_) | O::F64Lt(_) | O::F64Gt(_) | O::F64Le(_) | O::F64Ge(_) => {
                OpSignature::fixed(&[F64, F64], &[I32])
            }
            O::F32Add(_) | O::F32Sub(_) | O::F32Mul(_) | O::F32Div(_) | O::F32Min(_)
            | O::F32Max(_) | O::F32Copysign(_) => OpSignature::fixed(&[F32, F32], &[F32]),
            O::F64Add(_) | O::F64Sub(_) | O::F64Mul(_) | O::F64Div(_) | O::F64Min(_)
            | O::F64Max(_) | O::F64Copysign(_) => OpSignature::fixed(&[F64, F64], &[F64]),
            O::F32Abs(_) | O::F32Neg(_) | O::F32Ceil(_) | O::F32Floor(_) | O::F32Trunc(_)
            | O::F32Nearest(_) | O::F32Sqrt(_) => OpSignature::fixed(&[F32], &[F32]),
            O::F64Abs(_) | O::F64Neg(_) | O::F64Ceil(_) | O::F64Floor(_) | O::F64Trunc(_)
            | O::F64Nearest(_) | O::F64Sqrt(_) => OpSignature::fixed(&[F64], &[F64]),

            // Conversions.
            O::I32WrapI64(_) => OpSignature::fixed(&[I64], &[I32]),
            O::I32TruncF32S(_) | O::I32TruncF32U(_) | O::I32TruncSatF32S(_)
            | O::I32TruncSatF32U(_) | O::I32ReinterpretF32(_) => {
                OpSignature::fixed(&[F32], &[I32])
            }
            O::I32TruncF64S(_) | O::I32TruncF64U(_) | O::I32TruncSatF64S(_)
            | O::I32TruncSatF64U(_) => OpSignature::fixed(&[F64], &[I32]),
            O::I64ExtendI32S(_) | O::I64ExtendI32U(_) => OpSignature::fixed(&[I32], &[I64]),
            O::I64TruncF32S(_) | O::I64TruncF32U(_) | O::I64TruncSatF32S(_)
            | O::I64TruncSatF32U(_) => OpSignature::fixed(&[F32], &[I64]),
            O::I64TruncF64S(_) | O::I64TruncF64U(_) | O::I64TruncSatF64S(_)
            | O::I64TruncSatF64U(_) | O::I64ReinterpretF64(_) => {
                OpSignature::fixed(&[F64], &[I64])
            }
            O::F32ConvertI32S(_) | O::F32ConvertI32U(_) | O::F32ReinterpretI32(_) => {
                OpSignature::fixed(&[I32], &[F32])
            }
            O::F32ConvertI64S(_) | O::F32ConvertI64U(_) => OpSignature::fixed(&[I64], &[F32]),
            O::F32DemoteF64(_) => OpSignature::fixed(&[F64], &[F32]),
            O::F64ConvertI32S(_) | O::F64ConvertI32U(_) => OpSignature::fixed(&[I32], &[F64]),
            O::F64ConvertI64S(_) | O::F64ConvertI64U(_) | O::F64ReinterpretI64(_) => {
                OpSignature::fixed(&[I64], &[F64])
            }
            O::F64PromoteF32(_) => OpSignature::fixed(&[F32], &[F64]),

            // References.
            O::RefNull(imm) => OpSignature::owned(vec![], vec![imm.ty.into()]),
            O::RefFunc(_) => OpSignature::fixed(&[], &[FuncRef]),

            // Plain loads and stores.
            O::I32Load(imm) | O::I32Load8S(imm) | O::I32Load8U(imm) | O::I32Load16S(imm)
            | O::I32Load16U(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr], vec![I32])
            }
            O::I64Load(imm) | O::I64Load8S(imm) | O::I64Load8U(imm) | O::I64Load16S(imm)
            | O::I64Load16U(imm) | O::I64Load32S(imm) | O::I64Load32U(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr], vec![I64])
            }
            O::F32Load(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr], vec![F32])
            }
            O::F64Load(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr], vec![F64])
            }
            O::V128Load(imm) | O::V128Load8x8S(imm) | O::V128Load8x8U(imm)
            | O::V128Load16x4S(imm) | O::V128Load16x4U(imm) | O::V128Load32x2S(imm)
            | O::V128Load32x2U(imm) | O::V128Load8Splat(imm) | O::V128Load16Splat(imm)
            | O::V128Load32Splat(imm) | O::V128Load64Splat(imm) | O::V128Load32Zero(imm)
            | O::V128Load64Zero(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr], vec![V128])
            }
            O::I32Store(imm) | O::I32Store8(imm) | O::I32Store16(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I32], vec![])
            }
            O::I64Store(imm) | O::I64Store8(imm) | O::I64Store16(imm) | O::I64Store32(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I64], vec![])
            }
            O::F32Store(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, F32], vec![])
            }
            O::F64Store(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, F64], vec![])
            }
            O::V128Store(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, V128], vec![])
            }
            O::V128Load8Lane(imm) | O::V128Load16Lane(imm) | O::V128Load32Lane(imm)
            | O::V128Load64Lane(imm) => {
                let addr = memory_address_type(module, imm.mem.memory_index)?;
                OpSignature::owned(vec![addr, V128], vec![V128])
            }
            O::V128Store8Lane(imm) | O::V128Store16Lane(imm) | O::V128Store32Lane(imm)
            | O::V128Store64Lane(imm) => {
                let addr = memory_address_type(module, imm.mem.memory_index)?;
                OpSignature::owned(vec![addr, V128], vec![])
            }

            // Memory management.
            O::MemorySize(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![], vec![addr])
            }
            O::MemoryGrow(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr], vec![addr])
            }
            O::MemoryFill(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I32, addr], vec![])
            }
            O::MemoryCopy(imm) => {
                let dest = memory_address_type(module, imm.dest_memory)?;
                let source = memory_address_type(module, imm.source_memory)?;
                OpSignature::owned(vec![dest, source, min_address_type(dest, source)], vec![])
            }
            O::MemoryInit(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I32, I32], vec![])
            }
            O::DataDrop(_) | O::ElemDrop(_) => OpSignature::fixed(&[], &[]),

            // Tables.
            O::TableGet(imm) => {
                let addr = table_address_type(module, imm.table_index)?;
                let elem = table_element_type(module, imm.table_index)?;
                OpSignature::owned(vec![addr], vec![elem])
            }
            O::TableSet(imm) => {
                let addr = table_address_type(module, imm.table_index)?;
                let elem = table_element_type(module, imm.table_index)?;
                OpSignature::owned(vec![addr, elem], vec![])
            }
            O::TableGrow(imm) => {
                let addr = table_address_type(module, imm.table_index)?;
                let elem = table_element_type(module, imm.table_index)?;
                OpSignature::owned(vec![elem, addr], vec![addr])
            }
            O::TableSize(imm) => {
                let addr = table_address_type(module, imm.table_index)?;
                OpSignature::owned(vec![], vec![addr])
            }
            O::TableFill(imm) => {
                let addr = table_address_type(module, imm.table_index)?;
                let elem = table_element_type(module, imm.table_index)?;
                OpSignature::owned(vec![addr, elem, addr], vec![])
            }
            O::TableCopy(imm) => {
                let dest = table_address_type(module, imm.dest_table)?;
                let source = table_address_type(module, imm.source_table)?;
                OpSignature::owned(vec![dest, source, min_address_type(dest, source)], vec![])
            }
            O::TableInit(imm) => {
                let addr = table_address_type(module, imm.table_index)?;
                OpSignature::owned(vec![addr, I32, I32], vec![])
            }

            // Atomics.
            O::MemoryAtomicNotify(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I32], vec![I32])
            }
            O::MemoryAtomicWait32(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I32, I64], vec![I32])
            }
            O::MemoryAtomicWait64(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I64, I64], vec![I32])
            }
            O::AtomicFence(_) => OpSignature::fixed(&[], &[]),
            O::I32AtomicLoad(imm) | O::I32AtomicLoad8U(imm) | O::I32AtomicLoad16U(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr], vec![I32])
            }
            O::I64AtomicLoad(imm) | O::I64AtomicLoad8U(imm) | O::I64AtomicLoad16U(imm)
            | O::I64AtomicLoad32U(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr], vec![I64])
            }
            O::I32AtomicStore(imm) | O::I32AtomicStore8(imm) | O::I32AtomicStore16(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I32], vec![])
            }
            O::I64AtomicStore(imm) | O::I64AtomicStore8(imm) | O::I64AtomicStore16(imm)
            | O::I64AtomicStore32(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I64], vec![])
            }
            O::I32AtomicRmwAdd(imm) | O::I32AtomicRmw8AddU(imm) | O::I32AtomicRmw16AddU(imm)
            | O::I32AtomicRmwSub(imm) | O::I32AtomicRmw8SubU(imm) | O::I32AtomicRmw16SubU(imm)
            | O::I32AtomicRmwAnd(imm) | O::I32AtomicRmw8AndU(imm) | O::I32AtomicRmw16AndU(imm)
            | O::I32AtomicRmwOr(imm) | O::I32AtomicRmw8OrU(imm) | O::I32AtomicRmw16OrU(imm)
            | O::I32AtomicRmwXor(imm) | O::I32AtomicRmw8XorU(imm) | O::I32AtomicRmw16XorU(imm)
            | O::I32AtomicRmwXchg(imm) | O::I32AtomicRmw8XchgU(imm)
            | O::I32AtomicRmw16XchgU(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I32], vec![I32])
            }
            O::I64AtomicRmwAdd(imm) | O::I64AtomicRmw8AddU(imm) | O::I64AtomicRmw16AddU(imm)
            | O::I64AtomicRmw32AddU(imm) | O::I64AtomicRmwSub(imm) | O::I64AtomicRmw8SubU(imm)
            | O::I64AtomicRmw16SubU(imm) | O::I64AtomicRmw32SubU(imm) | O::I64AtomicRmwAnd(imm)
            | O::I64AtomicRmw8AndU(imm) | O::I64AtomicRmw16AndU(imm)
            | O::I64AtomicRmw32AndU(imm) | O::I64AtomicRmwOr(imm) | O::I64AtomicRmw8OrU(imm)
            | O::I64AtomicRmw16OrU(imm) | O::I64AtomicRmw32OrU(imm) | O::I64AtomicRmwXor(imm)
            | O::I64AtomicRmw8XorU(imm) | O::I64AtomicRmw16XorU(imm)
            | O::I64AtomicRmw32XorU(imm) | O::I64AtomicRmwXchg(imm)
            | O::I64AtomicRmw8XchgU(imm) | O::I64AtomicRmw16XchgU(imm)
            | O::I64AtomicRmw32XchgU(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I64], vec![I64])
            }
            O::I32AtomicRmwCmpxchg(imm) | O::I32AtomicRmw8CmpxchgU(imm)
            | O::I32AtomicRmw16CmpxchgU(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I32, I32], vec![I32])
            }
            O::I64AtomicRmwCmpxchg(imm) | O::I64AtomicRmw8CmpxchgU(imm)
            | O::I64AtomicRmw16CmpxchgU(imm) | O::I64AtomicRmw32CmpxchgU(imm) => {
                let addr = memory_address_type(module, imm.memory_index)?;
                OpSignature::owned(vec![addr, I64, I64], vec![I64])
            }

            // SIMD shapes.
            O::I8x16Splat(_) | O::I16x8Splat(_) | O::I32x4Splat(_) => {
                OpSignature::fixed(&[I32], &[V128])
            }
            O::I64x2Splat(_) => OpSignature::fixed(&[I64], &[V128]),
            O::F32x4Splat(_) => OpSignature::fixed(&[F32], &[V128]),
            O::F64x2Splat(_) => OpSignature::fixed(&[F64], &[V128]),
            O::I8x16ExtractLaneS(_) | O::I8x16ExtractLaneU(_) | O::I16x8ExtractLaneS(_)
            | O::I16x8ExtractLaneU(_) | O::I32x4ExtractLane(_) => {
                OpSignature::fixed(&[V128], &[I32])
            }
            O::I64x2ExtractLane(_) => OpSignature::fixed(&[V128], &[I64]),
            O::F32x4ExtractLane(_) => OpSignature::fixed(&[V128], &[F32]),
            O::F64x2ExtractLane(_) => OpSignature::fixed(&[V128], &[F64]),
            O::I8x16ReplaceLane(_) | O::I16x8ReplaceLane(_) | O::I32x4ReplaceLane(_) => {
                OpSignature::fixed(&[V128, I32], &[V128])
            }
            O::I64x2ReplaceLane(_) => OpSignature::fixed(&[V128, I64], &[V128]),
            O::F32x4ReplaceLane(_) => OpSignature::fixed(&[V128, F32], &[V128]),
            O::F64x2ReplaceLane(_) => OpSignature::fixed(&[V128, F64], &[V128]),
            O::V128AnyTrue(_) | O::I8x16AllTrue(_) | O::I8x16Bitmask(_) | O::I16x8AllTrue(_)
            | O::I16x8Bitmask(_) | O::I32x4AllTrue(_) | O::I32x4Bitmask(_)
            | O::I64x2AllTrue(_) | O::I64x2Bitmask(_) => OpSignature::fixed(&[V128], &[I32]),
            O::I8x16Shl(_) | O::I8x16ShrS(_) | O::I8x16ShrU(_) | O::I16x8Shl(_)
            | O::I16x8ShrS(_) | O::I16x8ShrU(_) | O::I32x4Shl(_) | O::I32x4ShrS(_)
            | O::I32x4ShrU(_) | O::I64x2Shl(_) | O::I64x2ShrS(_) | O::I64x2ShrU(_) => {
                OpSignature::fixed(&[V128, I32], &[V128])
            }
            O::V128Bitselect(_) => OpSignature::fixed(&[V128, V128, V128], &[V128]),
            O::V128Not(_) | O::I8x16Abs(_) | O::I8x16Neg(_) | O::I8x16Popcnt(_)
            | O::I16x8Abs(_) | O::I16x8Neg(_) | O::I32x4Abs(_) | O::I32x4Neg(_)
            | O::I64x2Abs(_) | O::I64x2Neg(_) | O::F32x4Abs(_) | O::F32x4Neg(_)
            | O::F32x4Sqrt(_) | O::F32x4Ceil(_) | O::F32x4Floor(_) | O::F32x4Trunc(_)
            | O::F32x4Nearest(_) | O::F64x2Abs(_) | O::F64x2Neg(_) | O::F64x2Sqrt(_)
            | O::F64x2Ceil(_) | O::F64x2Floor(_) | O::F64x2Trunc(_) | O::F64x2Nearest(_)
            | O::F32x4DemoteF64x2Zero(_) | O::F64x2PromoteLowF32x4(_)
            | O::I16x8ExtaddPairwiseI8x16S(_) | O::I16x8ExtaddPairwiseI8x16U(_)
            | O::I32x4ExtaddPairwiseI16x8S(_) | O::I32x4ExtaddPairwiseI16x8U(_)
            | O::I16x8ExtendLowI8x16S(_) | O::I16x8ExtendHighI8x16S(_)
            | O::I16x8ExtendLowI8x16U(_) | O::I16x8ExtendHighI8x16U(_)
            | O::I32x4ExtendLowI16x8S(_) | O::I32x4ExtendHighI16x8S(_)
            | O::I32x4ExtendLowI16x8U(_) | O::I32x4ExtendHighI16x8U(_)
            | O::I64x2ExtendLowI32x4S(_) | O::I64x2ExtendHighI32x4S(_)
            | O::I64x2ExtendLowI32x4U(_) | O::I64x2ExtendHighI32x4U(_)
            | O::I32x4TruncSatF32x4S(_) | O::I32x4TruncSatF32x4U(_)
            | O::F32x4ConvertI32x4S(_) | O::F32x4ConvertI32x4U(_)
            | O::I32x4TruncSatF64x2SZero(_) | O::I32x4TruncSatF64x2UZero(_)
            | O::F64x2ConvertLowI32x4S(_) | O::F64x2ConvertLowI32x4U(_) => {
                OpSignature::fixed(&[V128], &[V128])
            }

            // Everything else with opcode prefix 0xFD is a v128 binop.
            op if op.encoded_opcode() >> 8 == 0xFD => {
                OpSignature::fixed(&[V128, V128], &[V128])
            }

            // Structural operators are typed by the validator.
            _ => return Ok(None),
        };
        Ok(Some(sig))
    }
}
