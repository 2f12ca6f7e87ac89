//! Codecs for the type-level encodings: value types, reference types,
//! function types, table/memory/global/exception types, block types, and
//! initializer expressions.

use super::stream::{Reader, Writer};
use crate::errors::SerializationError;
use crate::indices::{FuncIndex, GlobalIndex, TypeIndex};
use crate::ir::{BlockType, ConstExpr};
use crate::types::{
    CallingConvention, FunctionType, GlobalType, IndexType, MemoryType, ReferenceType,
    SizeConstraints, TableType, TagType, TypeTuple, ValueType,
};
use crate::V128;
use alloc::format;
use alloc::vec::Vec;

pub(crate) fn decode_value_type(reader: &mut Reader) -> Result<ValueType, SerializationError> {
    let encoded = reader.read_var_s(7)?;
    match encoded {
        -1 => Ok(ValueType::I32),
        -2 => Ok(ValueType::I64),
        -3 => Ok(ValueType::F32),
        -4 => Ok(ValueType::F64),
        -5 => Ok(ValueType::V128),
        -16 => Ok(ValueType::FuncRef),
        -17 => Ok(ValueType::ExternRef),
        _ => Err(reader.malformed(format!("unknown value type {encoded}"))),
    }
}

pub(crate) fn encode_value_type(writer: &mut Writer, ty: ValueType) {
    let encoded: i64 = match ty {
        ValueType::I32 => -1,
        ValueType::I64 => -2,
        ValueType::F32 => -3,
        ValueType::F64 => -4,
        ValueType::V128 => -5,
        ValueType::FuncRef => -16,
        ValueType::ExternRef => -17,
        ValueType::None | ValueType::Any => {
            unreachable!("the bottom and top types have no encoding")
        }
    };
    writer.write_var_s64(encoded);
}

pub(crate) fn decode_reference_type(
    reader: &mut Reader,
) -> Result<ReferenceType, SerializationError> {
    match reader.read_u8()? {
        0x70 => Ok(ReferenceType::FuncRef),
        0x6F => Ok(ReferenceType::ExternRef),
        byte => Err(reader.malformed(format!("unknown reference type 0x{byte:02x}"))),
    }
}

pub(crate) fn encode_reference_type(writer: &mut Writer, ty: ReferenceType) {
    writer.write_u8(match ty {
        ReferenceType::FuncRef => 0x70,
        ReferenceType::ExternRef => 0x6F,
    });
}

pub(crate) fn decode_type_tuple(reader: &mut Reader) -> Result<TypeTuple, SerializationError> {
    let count = reader.read_var_u32()? as usize;
    let mut elems = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        elems.push(decode_value_type(reader)?);
    }
    Ok(TypeTuple::new(elems))
}

pub(crate) fn encode_type_tuple(writer: &mut Writer, tuple: TypeTuple) {
    writer.write_var_u32(u32::try_from(tuple.len()).unwrap());
    for ty in tuple.elems() {
        encode_value_type(writer, *ty);
    }
}

pub(crate) fn decode_function_type(
    reader: &mut Reader,
) -> Result<FunctionType, SerializationError> {
    let calling_convention = match reader.read_u8()? {
        0x60 => CallingConvention::Wasm,
        0x61 => match reader.read_var_u32()? {
            0 => CallingConvention::Intrinsic,
            1 => CallingConvention::IntrinsicWithContextSwitch,
            2 => CallingConvention::C,
            3 => CallingConvention::CApiCallback,
            cc => return Err(reader.malformed(format!("unknown calling convention {cc}"))),
        },
        byte => return Err(reader.malformed(format!("unknown function type prefix 0x{byte:02x}"))),
    };
    let params = decode_type_tuple(reader)?;
    let results = decode_type_tuple(reader)?;
    Ok(FunctionType::new(results, params, calling_convention))
}

pub(crate) fn encode_function_type(writer: &mut Writer, ty: FunctionType) {
    match ty.calling_convention() {
        CallingConvention::Wasm => writer.write_u8(0x60),
        cc => {
            writer.write_u8(0x61);
            writer.write_var_u32(match cc {
                CallingConvention::Wasm => unreachable!(),
                CallingConvention::Intrinsic => 0,
                CallingConvention::IntrinsicWithContextSwitch => 1,
                CallingConvention::C => 2,
                CallingConvention::CApiCallback => 3,
            });
        }
    }
    encode_type_tuple(writer, ty.params());
    encode_type_tuple(writer, ty.results());
}

const FLAG_HAS_MAX: u8 = 0b001;
const FLAG_SHARED: u8 = 0b010;
const FLAG_INDEX_64: u8 = 0b100;

fn decode_size_constraints(
    reader: &mut Reader,
    index_type: IndexType,
    has_max: bool,
) -> Result<SizeConstraints, SerializationError> {
    let bits = match index_type {
        IndexType::I32 => 32,
        IndexType::I64 => 64,
    };
    let min = reader.read_var_u(bits)?;
    let max = if has_max {
        reader.read_var_u(bits)?
    } else {
        SizeConstraints::UNBOUNDED
    };
    Ok(SizeConstraints { min, max })
}

fn encode_size_constraints(writer: &mut Writer, size: SizeConstraints) {
    writer.write_var_u64(size.min);
    if size.is_bounded() {
        writer.write_var_u64(size.max);
    }
}

fn decode_flags(reader: &mut Reader) -> Result<(bool, bool, IndexType), SerializationError> {
    let flags = reader.read_u8()?;
    if flags & !(FLAG_HAS_MAX | FLAG_SHARED | FLAG_INDEX_64) != 0 {
        return Err(reader.malformed(format!("invalid limits flags 0x{flags:02x}")));
    }
    let index_type = if flags & FLAG_INDEX_64 != 0 {
        IndexType::I64
    } else {
        IndexType::I32
    };
    Ok((flags & FLAG_HAS_MAX != 0, flags & FLAG_SHARED != 0, index_type))
}

fn encode_flags(writer: &mut Writer, shared: bool, index_type: IndexType, size: SizeConstraints) {
    let mut flags = 0u8;
    if size.is_bounded() {
        flags |= FLAG_HAS_MAX;
    }
    if shared {
        flags |= FLAG_SHARED;
    }
    if index_type == IndexType::I64 {
        flags |= FLAG_INDEX_64;
    }
    writer.write_u8(flags);
}

pub(crate) fn decode_table_type(reader: &mut Reader) -> Result<TableType, SerializationError> {
    let element_type = decode_reference_type(reader)?;
    let (has_max, shared, index_type) = decode_flags(reader)?;
    let size = decode_size_constraints(reader, index_type, has_max)?;
    Ok(TableType {
        element_type,
        shared,
        index_type,
        size,
    })
}

pub(crate) fn encode_table_type(writer: &mut Writer, ty: TableType) {
    encode_reference_type(writer, ty.element_type);
    encode_flags(writer, ty.shared, ty.index_type, ty.size);
    encode_size_constraints(writer, ty.size);
}

pub(crate) fn decode_memory_type(reader: &mut Reader) -> Result<MemoryType, SerializationError> {
    let (has_max, shared, index_type) = decode_flags(reader)?;
    let size = decode_size_constraints(reader, index_type, has_max)?;
    Ok(MemoryType {
        shared,
        index_type,
        size,
    })
}

pub(crate) fn encode_memory_type(writer: &mut Writer, ty: MemoryType) {
    encode_flags(writer, ty.shared, ty.index_type, ty.size);
    encode_size_constraints(writer, ty.size);
}

pub(crate) fn decode_global_type(reader: &mut Reader) -> Result<GlobalType, SerializationError> {
    let value_type = decode_value_type(reader)?;
    let is_mutable = match reader.read_u8()? {
        0 => false,
        1 => true,
        byte => return Err(reader.malformed(format!("invalid mutability flag {byte}"))),
    };
    Ok(GlobalType {
        value_type,
        is_mutable,
    })
}

pub(crate) fn encode_global_type(writer: &mut Writer, ty: GlobalType) {
    encode_value_type(writer, ty.value_type);
    writer.write_u8(u8::from(ty.is_mutable));
}

pub(crate) fn decode_tag_type(reader: &mut Reader) -> Result<TagType, SerializationError> {
    let params = decode_type_tuple(reader)?;
    Ok(TagType { params })
}

pub(crate) fn encode_tag_type(writer: &mut Writer, ty: TagType) {
    encode_type_tuple(writer, ty.params);
}

/// Block types are a single s33: non-negative values are type indices, -64
/// is the empty block type, and other negative values are value types.
pub(crate) fn decode_block_type(reader: &mut Reader) -> Result<BlockType, SerializationError> {
    if reader.peek_u8() == Some(0x40) {
        reader.read_u8()?;
        return Ok(BlockType::Empty);
    }
    let encoded = reader.read_var_s33()?;
    if encoded >= 0 {
        let index = u32::try_from(encoded)
            .map_err(|_| reader.malformed("block type index out of range"))?;
        return Ok(BlockType::FunctionType(TypeIndex::from_u32(index)));
    }
    let ty = match encoded {
        -1 => ValueType::I32,
        -2 => ValueType::I64,
        -3 => ValueType::F32,
        -4 => ValueType::F64,
        -5 => ValueType::V128,
        -16 => ValueType::FuncRef,
        -17 => ValueType::ExternRef,
        _ => return Err(reader.malformed(format!("unknown block type {encoded}"))),
    };
    Ok(BlockType::Value(ty))
}

pub(crate) fn encode_block_type(writer: &mut Writer, ty: BlockType) {
    match ty {
        BlockType::Empty => writer.write_u8(0x40),
        BlockType::Value(ty) => encode_value_type(writer, ty),
        BlockType::FunctionType(index) => writer.write_var_s33(i64::from(index.as_u32())),
    }
}

/// Initializer expressions: one constant operator followed by `end`.
pub(crate) fn decode_const_expr(reader: &mut Reader) -> Result<ConstExpr, SerializationError> {
    let expr = match reader.read_u8()? {
        0x41 => ConstExpr::I32Const(reader.read_var_s32()?),
        0x42 => ConstExpr::I64Const(reader.read_var_s64()?),
        0x43 => ConstExpr::F32Const(reader.read_f32_bits()?),
        0x44 => ConstExpr::F64Const(reader.read_f64_bits()?),
        0x23 => ConstExpr::GlobalGet(GlobalIndex::from_u32(reader.read_var_u32()?)),
        0xD0 => ConstExpr::RefNull(decode_reference_type(reader)?),
        0xD2 => ConstExpr::RefFunc(FuncIndex::from_u32(reader.read_var_u32()?)),
        0xFD => {
            if reader.read_var_u32()? != 0x0C {
                return Err(reader.malformed("expected v128.const in initializer expression"));
            }
            ConstExpr::V128Const(V128::from_bytes(reader.read_16_bytes()?))
        }
        byte => {
            return Err(reader.malformed(format!(
                "invalid initializer expression opcode 0x{byte:02x}"
            )))
        }
    };
    if reader.read_u8()? != 0x0B {
        return Err(reader.malformed("initializer expression is not terminated by end"));
    }
    Ok(expr)
}

pub(crate) fn encode_const_expr(writer: &mut Writer, expr: &ConstExpr) {
    match expr {
        ConstExpr::I32Const(value) => {
            writer.write_u8(0x41);
            writer.write_var_s32(*value);
        }
        ConstExpr::I64Const(value) => {
            writer.write_u8(0x42);
            writer.write_var_s64(*value);
        }
        ConstExpr::F32Const(bits) => {
            writer.write_u8(0x43);
            writer.write_f32_bits(*bits);
        }
        ConstExpr::F64Const(bits) => {
            writer.write_u8(0x44);
            writer.write_f64_bits(*bits);
        }
        ConstExpr::GlobalGet(index) => {
            writer.write_u8(0x23);
            writer.write_var_u32(index.as_u32());
        }
        ConstExpr::RefNull(ty) => {
            writer.write_u8(0xD0);
            encode_reference_type(writer, *ty);
        }
        ConstExpr::RefFunc(index) => {
            writer.write_u8(0xD2);
            writer.write_var_u32(index.as_u32());
        }
        ConstExpr::V128Const(value) => {
            writer.write_u8(0xFD);
            writer.write_var_u32(0x0C);
            writer.write_bytes(value.bytes());
        }
    }
    writer.write_u8(0x0B);
}
