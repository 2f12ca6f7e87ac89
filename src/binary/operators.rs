//! The operator stream codec. Each operator is `(opcode, immediates…)`;
//! opcodes are one byte or a prefix byte plus a LEB128 extension code. The
//! decode and encode dispatch tables are generated from the master operator
//! table.

use super::stream::{Reader, Writer};
use super::types::{decode_block_type, decode_reference_type, decode_value_type, encode_block_type,
    encode_reference_type, encode_value_type};
use crate::errors::SerializationError;
use crate::indices::{DataIndex, ElemIndex, FuncIndex, MemoryIndex, TableIndex, TagIndex, TypeIndex};
use crate::ir::operators::{
    for_each_operator, AtomicFenceImm, AtomicLoadOrStoreImm, BranchImm, BranchTableImm,
    CallIndirectImm, ControlStructureImm, DataSegmentAndMemImm, DataSegmentImm,
    ElemSegmentAndTableImm, ElemSegmentImm, ExceptionTypeImm, Float32, Float64, FunctionImm,
    FunctionRefImm, GetOrSetVariableImm, LaneIndexImm, LiteralImm, LoadOrStoreImm,
    LoadOrStoreLaneImm, MemoryCopyImm, MemoryImm, NoImm, Operator, ReferenceTypeImm, RethrowImm,
    SelectImm, ShuffleImm, TableCopyImm, TableImm,
};
use crate::V128;
use alloc::format;
use alloc::vec::Vec;

/// Bit 6 of a memarg's alignment flags marks an explicit memory index.
const MEMARG_HAS_MEMORY_INDEX: u32 = 0x40;

pub(crate) trait ImmCodec: Sized {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError>;
    fn encode(&self, writer: &mut Writer);
}

impl ImmCodec for NoImm {
    fn decode(_reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(NoImm)
    }
    fn encode(&self, _writer: &mut Writer) {}
}

impl ImmCodec for ControlStructureImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            block_type: decode_block_type(reader)?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        encode_block_type(writer, self.block_type);
    }
}

impl ImmCodec for SelectImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        let count = reader.read_var_u32()?;
        if count != 1 {
            return Err(reader.malformed("typed select must have exactly one result type"));
        }
        Ok(Self {
            ty: decode_value_type(reader)?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(1);
        encode_value_type(writer, self.ty);
    }
}

impl ImmCodec for BranchImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            target_depth: reader.read_var_u32()?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.target_depth);
    }
}

impl ImmCodec for BranchTableImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        let count = reader.read_var_u32()? as usize;
        let mut targets = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            targets.push(reader.read_var_u32()?);
        }
        Ok(Self {
            default_depth: reader.read_var_u32()?,
            targets: targets.into_boxed_slice(),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(u32::try_from(self.targets.len()).unwrap());
        for target in &self.targets {
            writer.write_var_u32(*target);
        }
        writer.write_var_u32(self.default_depth);
    }
}

impl ImmCodec for LiteralImm<i32> {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            value: reader.read_var_s32()?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_s32(self.value);
    }
}

impl ImmCodec for LiteralImm<i64> {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            value: reader.read_var_s64()?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_s64(self.value);
    }
}

impl ImmCodec for LiteralImm<Float32> {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            value: Float32(reader.read_f32_bits()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_f32_bits(self.value.0);
    }
}

impl ImmCodec for LiteralImm<Float64> {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            value: Float64(reader.read_f64_bits()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_f64_bits(self.value.0);
    }
}

impl ImmCodec for LiteralImm<V128> {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            value: V128::from_bytes(reader.read_16_bytes()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(self.value.bytes());
    }
}

impl ImmCodec for GetOrSetVariableImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            index: reader.read_var_u32()?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.index);
    }
}

impl ImmCodec for FunctionImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            function_index: FuncIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.function_index.as_u32());
    }
}

impl ImmCodec for FunctionRefImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            function_index: FuncIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.function_index.as_u32());
    }
}

impl ImmCodec for CallIndirectImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            type_index: TypeIndex::from_u32(reader.read_var_u32()?),
            table_index: TableIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.type_index.as_u32());
        writer.write_var_u32(self.table_index.as_u32());
    }
}

fn decode_memarg(reader: &mut Reader) -> Result<(MemoryIndex, u32, u64), SerializationError> {
    let flags = reader.read_var_u32()?;
    let align_log2 = flags & !MEMARG_HAS_MEMORY_INDEX;
    let memory_index = if flags & MEMARG_HAS_MEMORY_INDEX != 0 {
        MemoryIndex::from_u32(reader.read_var_u32()?)
    } else {
        MemoryIndex::from_u32(0)
    };
    let offset = reader.read_var_u64()?;
    Ok((memory_index, align_log2, offset))
}

fn encode_memarg(writer: &mut Writer, memory_index: MemoryIndex, align_log2: u32, offset: u64) {
    if memory_index.as_u32() == 0 {
        writer.write_var_u32(align_log2);
    } else {
        writer.write_var_u32(align_log2 | MEMARG_HAS_MEMORY_INDEX);
        writer.write_var_u32(memory_index.as_u32());
    }
    writer.write_var_u64(offset);
}

impl ImmCodec for LoadOrStoreImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        let (memory_index, align_log2, offset) = decode_memarg(reader)?;
        Ok(Self {
            memory_index,
            align_log2,
            offset,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        encode_memarg(writer, self.memory_index, self.align_log2, self.offset);
    }
}

impl ImmCodec for LoadOrStoreLaneImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            mem: LoadOrStoreImm::decode(reader)?,
            lane_index: reader.read_u8()?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        self.mem.encode(writer);
        writer.write_u8(self.lane_index);
    }
}

impl ImmCodec for AtomicLoadOrStoreImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        let (memory_index, align_log2, offset) = decode_memarg(reader)?;
        Ok(Self {
            memory_index,
            align_log2,
            offset,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        encode_memarg(writer, self.memory_index, self.align_log2, self.offset);
    }
}

impl ImmCodec for AtomicFenceImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        if reader.read_u8()? != 0 {
            return Err(reader.malformed("atomic.fence reserved byte must be zero"));
        }
        Ok(AtomicFenceImm)
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_u8(0);
    }
}

impl ImmCodec for MemoryImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            memory_index: MemoryIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.memory_index.as_u32());
    }
}

impl ImmCodec for MemoryCopyImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            dest_memory: MemoryIndex::from_u32(reader.read_var_u32()?),
            source_memory: MemoryIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.dest_memory.as_u32());
        writer.write_var_u32(self.source_memory.as_u32());
    }
}

impl ImmCodec for TableImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            table_index: TableIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.table_index.as_u32());
    }
}

impl ImmCodec for TableCopyImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            dest_table: TableIndex::from_u32(reader.read_var_u32()?),
            source_table: TableIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.dest_table.as_u32());
        writer.write_var_u32(self.source_table.as_u32());
    }
}

impl ImmCodec for LaneIndexImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            lane_index: reader.read_u8()?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_u8(self.lane_index);
    }
}

impl ImmCodec for ShuffleImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            lane_indices: reader.read_16_bytes()?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(&self.lane_indices);
    }
}

impl ImmCodec for ExceptionTypeImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            tag_index: TagIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.tag_index.as_u32());
    }
}

impl ImmCodec for RethrowImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            catch_depth: reader.read_var_u32()?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.catch_depth);
    }
}

impl ImmCodec for DataSegmentAndMemImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            data_index: DataIndex::from_u32(reader.read_var_u32()?),
            memory_index: MemoryIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.data_index.as_u32());
        writer.write_var_u32(self.memory_index.as_u32());
    }
}

impl ImmCodec for DataSegmentImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            data_index: DataIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.data_index.as_u32());
    }
}

impl ImmCodec for ElemSegmentAndTableImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            elem_index: ElemIndex::from_u32(reader.read_var_u32()?),
            table_index: TableIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.elem_index.as_u32());
        writer.write_var_u32(self.table_index.as_u32());
    }
}

impl ImmCodec for ElemSegmentImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            elem_index: ElemIndex::from_u32(reader.read_var_u32()?),
        })
    }
    fn encode(&self, writer: &mut Writer) {
        writer.write_var_u32(self.elem_index.as_u32());
    }
}

impl ImmCodec for ReferenceTypeImm {
    fn decode(reader: &mut Reader) -> Result<Self, SerializationError> {
        Ok(Self {
            ty: decode_reference_type(reader)?,
        })
    }
    fn encode(&self, writer: &mut Writer) {
        encode_reference_type(writer, self.ty);
    }
}

fn read_opcode(reader: &mut Reader) -> Result<u16, SerializationError> {
    let byte = reader.read_u8()?;
    match byte {
        0xFC | 0xFD | 0xFE => {
            let sub = reader.read_var_u32()?;
            if sub > 0xFF {
                return Err(reader.malformed(format!(
                    "unknown opcode 0x{byte:02x} 0x{sub:02x}"
                )));
            }
            Ok(u16::from(byte) << 8 | u16::try_from(sub).unwrap())
        }
        _ => Ok(u16::from(byte)),
    }
}

fn write_opcode(writer: &mut Writer, code: u16) {
    let prefix = code >> 8;
    if prefix == 0 {
        writer.write_u8(u8::try_from(code).unwrap());
    } else {
        writer.write_u8(u8::try_from(prefix).unwrap());
        writer.write_var_u32(u32::from(code & 0xFF));
    }
}

macro_rules! define_operator_codec {
    ($(($op:ident, $imm:ty, $code:literal, $name:literal, $feat:ident)),* $(,)?) => {
        pub(crate) fn decode_operator(reader: &mut Reader) -> Result<Operator, SerializationError> {
            let offset = reader.offset();
            let code = read_opcode(reader)?;
            Ok(match code {
                $( $code => Operator::$op(<$imm as ImmCodec>::decode(reader)?), )*
                _ => {
                    return Err(SerializationError::Malformed {
                        message: format!("unknown opcode 0x{code:04x}"),
                        offset,
                    })
                }
            })
        }

        pub(crate) fn encode_operator(writer: &mut Writer, op: &Operator) {
            match op {
                $( Operator::$op(imm) => {
                    write_opcode(writer, $code);
                    ImmCodec::encode(imm, writer);
                } )*
            }
        }
    };
}
for_each_operator!(define_operator_codec);

/// An iterator over `(offset, Operator)` pairs in a serialized body.
pub struct OperatorsReader<'a> {
    reader: Reader<'a>,
}

impl<'a> OperatorsReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            reader: Reader::new(bytes),
        }
    }

    pub(crate) fn from_reader(reader: Reader<'a>) -> Self {
        Self { reader }
    }

    pub fn is_at_end(&self) -> bool {
        self.reader.is_at_end()
    }

    pub fn offset(&self) -> usize {
        self.reader.offset()
    }

    pub fn read(&mut self) -> Result<(usize, Operator), SerializationError> {
        let offset = self.reader.offset();
        let op = decode_operator(&mut self.reader)?;
        Ok((offset, op))
    }
}

impl Iterator for OperatorsReader<'_> {
    type Item = Result<(usize, Operator), SerializationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_at_end() {
            None
        } else {
            Some(self.read())
        }
    }
}

/// A streaming encoder producing a serialized operator body.
#[derive(Default)]
pub struct OperatorsWriter {
    writer: Writer,
}

impl OperatorsWriter {
    pub fn new() -> Self {
        Self {
            writer: Writer::new(),
        }
    }

    pub fn push(&mut self, op: &Operator) {
        encode_operator(&mut self.writer, op);
    }

    pub fn finish(self) -> Vec<u8> {
        self.writer.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_round_trip() {
        let ops = [
            Operator::LocalGet(GetOrSetVariableImm { index: 0 }),
            Operator::I32Const(LiteralImm { value: -42 }),
            Operator::I32Add(NoImm),
            Operator::I32Load(LoadOrStoreImm {
                memory_index: MemoryIndex::from_u32(0),
                align_log2: 2,
                offset: 1024,
            }),
            Operator::BrTable(BranchTableImm {
                default_depth: 0,
                targets: alloc::vec![1, 2, 3].into_boxed_slice(),
            }),
            Operator::V128Const(LiteralImm {
                value: V128::from_u128(0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10),
            }),
            Operator::End(NoImm),
        ];

        let mut writer = OperatorsWriter::new();
        for op in &ops {
            writer.push(op);
        }
        let bytes = writer.finish();

        let decoded: Vec<Operator> = OperatorsReader::new(&bytes)
            .map(|result| result.map(|(_, op)| op))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(&decoded[..], &ops[..]);
    }

    #[test]
    fn unknown_opcode_is_malformed() {
        let bytes = [0xFF];
        let mut reader = OperatorsReader::new(&bytes);
        assert!(reader.read().is_err());
    }
}
