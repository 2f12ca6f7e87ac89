//! A deterministic generator of small valid modules, seeded by a byte
//! stream. Used as test infrastructure to feed the round-trip and
//! validator-soundness properties with structurally varied inputs.

use crate::binary::OperatorsWriter;
use crate::indices::{EntityIndex, FuncIndex, MemoryIndex, TableIndex, TypeIndex};
use crate::ir::operators::{
    ControlStructureImm, GetOrSetVariableImm, LiteralImm, LoadOrStoreImm, NoImm, Operator,
};
use crate::ir::{
    BlockType, ConstExpr, ElemContents, ElemSegment, ElemSegmentKind, Export, FeatureSpec,
    FunctionDef, GlobalDef, Module,
};
use crate::types::{
    FunctionType, GlobalType, IndexType, MemoryType, ReferenceType, SizeConstraints, TableType,
    TypeTuple, ValueType,
};
use alloc::format;
use alloc::vec::Vec;

/// A byte-stream random source: reads beyond the seed yield zero, so every
/// seed (including the empty one) produces a module.
pub struct RandomStream<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RandomStream<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn u8(&mut self) -> u8 {
        let byte = self.bytes.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        byte
    }

    pub fn u32(&mut self) -> u32 {
        u32::from_le_bytes([self.u8(), self.u8(), self.u8(), self.u8()])
    }

    pub fn below(&mut self, bound: u32) -> u32 {
        debug_assert!(bound > 0);
        self.u32() % bound
    }

    pub fn bool(&mut self) -> bool {
        self.u8() & 1 != 0
    }

    pub fn pick<'t, T>(&mut self, options: &'t [T]) -> &'t T {
        &options[self.below(u32::try_from(options.len()).unwrap()) as usize]
    }
}

const NUMERIC_MENU: [ValueType; 4] = [
    ValueType::I32,
    ValueType::I64,
    ValueType::F32,
    ValueType::F64,
];

fn random_const(rng: &mut RandomStream, ty: ValueType) -> Operator {
    match ty {
        ValueType::I32 => Operator::I32Const(LiteralImm {
            value: i32::from_le_bytes(rng.u32().to_le_bytes()),
        }),
        ValueType::I64 => Operator::I64Const(LiteralImm {
            value: i64::from(i32::from_le_bytes(rng.u32().to_le_bytes())),
        }),
        ValueType::F32 => Operator::F32Const(LiteralImm {
            value: crate::ir::operators::Float32::from_f32(f32::from(rng.u8())),
        }),
        ValueType::F64 => Operator::F64Const(LiteralImm {
            value: crate::ir::operators::Float64::from_f64(f64::from(rng.u8())),
        }),
        _ => unreachable!("only numeric types appear in generated bodies"),
    }
}

fn random_binop(rng: &mut RandomStream, ty: ValueType) -> Operator {
    match ty {
        ValueType::I32 => rng
            .pick(&[
                Operator::I32Add(NoImm),
                Operator::I32Sub(NoImm),
                Operator::I32Mul(NoImm),
                Operator::I32And(NoImm),
                Operator::I32Or(NoImm),
                Operator::I32Xor(NoImm),
            ])
            .clone(),
        ValueType::I64 => rng
            .pick(&[
                Operator::I64Add(NoImm),
                Operator::I64Sub(NoImm),
                Operator::I64Mul(NoImm),
                Operator::I64Xor(NoImm),
            ])
            .clone(),
        ValueType::F32 => rng
            .pick(&[
                Operator::F32Add(NoImm),
                Operator::F32Sub(NoImm),
                Operator::F32Mul(NoImm),
            ])
            .clone(),
        ValueType::F64 => rng
            .pick(&[
                Operator::F64Add(NoImm),
                Operator::F64Sub(NoImm),
                Operator::F64Mul(NoImm),
            ])
            .clone(),
        _ => unreachable!(),
    }
}

fn generate_body(
    rng: &mut RandomStream,
    ty: FunctionType,
    locals: &[ValueType],
    has_memory: bool,
) -> Vec<u8> {
    let mut all_locals: Vec<ValueType> = ty.params().elems().to_vec();
    all_locals.extend_from_slice(locals);

    let mut writer = OperatorsWriter::new();
    let mut stack: Vec<ValueType> = Vec::new();

    let steps = 3 + rng.below(12);
    for _ in 0..steps {
        match rng.below(8) {
            0 | 1 => {
                let ty = *rng.pick(&NUMERIC_MENU);
                writer.push(&random_const(rng, ty));
                stack.push(ty);
            }
            2 => {
                if all_locals.is_empty() {
                    writer.push(&Operator::Nop(NoImm));
                } else {
                    let index = rng.below(u32::try_from(all_locals.len()).unwrap());
                    writer.push(&Operator::LocalGet(GetOrSetVariableImm { index }));
                    stack.push(all_locals[index as usize]);
                }
            }
            3 => {
                let len = stack.len();
                if len >= 2 && stack[len - 1] == stack[len - 2] && stack[len - 1].is_numeric() {
                    let ty = stack.pop().unwrap();
                    writer.push(&random_binop(rng, ty));
                } else {
                    writer.push(&Operator::Nop(NoImm));
                }
            }
            4 => {
                if stack.pop().is_some() {
                    writer.push(&Operator::Drop(NoImm));
                } else {
                    writer.push(&Operator::Nop(NoImm));
                }
            }
            5 => {
                // An empty block; its end comes before the function's.
                writer.push(&Operator::Block(ControlStructureImm {
                    block_type: BlockType::Empty,
                }));
                writer.push(&Operator::End(NoImm));
            }
            6 => {
                if has_memory {
                    // A 32-bit access kept within the memory's one
                    // guaranteed page: address and offset together stay
                    // well below 64KiB.
                    let imm = LoadOrStoreImm {
                        memory_index: MemoryIndex::from_u32(0),
                        align_log2: rng.below(3),
                        offset: u64::from(rng.below(1024)),
                    };
                    writer.push(&Operator::I32Const(LiteralImm {
                        value: i32::from(rng.u8()),
                    }));
                    if rng.bool() {
                        writer.push(&Operator::I32Load(imm));
                        stack.push(ValueType::I32);
                    } else {
                        writer.push(&Operator::I32Const(LiteralImm {
                            value: i32::from(rng.u8()),
                        }));
                        writer.push(&Operator::I32Store(imm));
                    }
                } else {
                    writer.push(&Operator::Nop(NoImm));
                }
            }
            _ => writer.push(&Operator::Nop(NoImm)),
        }
    }
    // Settle the stack to exactly the declared results.
    while stack.pop().is_some() {
        writer.push(&Operator::Drop(NoImm));
    }
    for result in ty.results().elems() {
        writer.push(&random_const(rng, *result));
    }
    writer.push(&Operator::End(NoImm));
    writer.finish()
}

/// Generates a valid module from `seed` under `features`. The same seed
/// always yields the same module.
pub fn generate_module(seed: &[u8], features: FeatureSpec) -> Module {
    let mut rng = RandomStream::new(seed);
    let mut module = Module::new(features);

    // Types: numeric params and at most one result, so the generated code
    // validates under any feature set.
    let num_types = 1 + rng.below(4);
    for _ in 0..num_types {
        let num_params = rng.below(3) as usize;
        let params: TypeTuple = (0..num_params)
            .map(|_| *rng.pick(&NUMERIC_MENU))
            .collect();
        let results: TypeTuple = if rng.bool() {
            TypeTuple::new([*rng.pick(&NUMERIC_MENU)])
        } else {
            TypeTuple::empty()
        };
        module.types.push(FunctionType::wasm(results, params));
    }

    let has_memory = rng.bool();
    if has_memory {
        module.memories.defs.push(MemoryType {
            shared: false,
            index_type: IndexType::I32,
            size: SizeConstraints {
                min: 1,
                max: 1 + u64::from(rng.below(4)),
            },
        });
    }

    let num_globals = rng.below(3);
    for _ in 0..num_globals {
        let ty = *rng.pick(&NUMERIC_MENU);
        let initializer = match ty {
            ValueType::I32 => ConstExpr::I32Const(i32::from_le_bytes(rng.u32().to_le_bytes())),
            ValueType::I64 => ConstExpr::I64Const(i64::from(rng.u8())),
            ValueType::F32 => ConstExpr::F32Const(f32::from(rng.u8()).to_bits()),
            ValueType::F64 => ConstExpr::F64Const(f64::from(rng.u8()).to_bits()),
            _ => unreachable!(),
        };
        module.globals.defs.push(GlobalDef {
            ty: GlobalType {
                value_type: ty,
                is_mutable: rng.bool() && features.import_export_mutable_globals,
            },
            initializer,
        });
    }

    let num_functions = 1 + rng.below(4);
    for _ in 0..num_functions {
        let type_index = TypeIndex::from_u32(rng.below(num_types));
        let ty = module.type_at(type_index).unwrap();
        let num_locals = rng.below(3) as usize;
        let locals: Vec<ValueType> = (0..num_locals)
            .map(|_| *rng.pick(&NUMERIC_MENU))
            .collect();
        let code = generate_body(&mut rng, ty, &locals, has_memory);
        module.functions.defs.push(FunctionDef {
            type_index,
            locals,
            code,
        });
    }

    // Maybe a funcref table with an active segment covering the functions.
    if features.reference_types && rng.bool() {
        module.tables.defs.push(TableType {
            element_type: ReferenceType::FuncRef,
            shared: false,
            index_type: IndexType::I32,
            size: SizeConstraints {
                min: u64::from(num_functions),
                max: u64::from(num_functions) + u64::from(rng.below(4)),
            },
        });
        module.elem_segments.push(ElemSegment {
            kind: ElemSegmentKind::Active {
                table_index: TableIndex::from_u32(0),
                offset: ConstExpr::I32Const(0),
            },
            contents: ElemContents::Indices {
                kind: crate::types::ExternKind::Function,
                indices: (0..num_functions).collect(),
            },
        });
    }

    for index in 0..num_functions {
        module.exports.push(Export {
            name: format!("f{index}"),
            index: EntityIndex::Function(FuncIndex::from_u32(index)),
        });
    }
    if has_memory {
        module.exports.push(Export {
            name: "memory".into(),
            index: EntityIndex::Memory(MemoryIndex::from_u32(0)),
        });
    }

    module
}
