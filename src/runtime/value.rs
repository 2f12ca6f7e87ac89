use super::function::FuncRef;
use crate::enum_accessors;
use crate::types::ValueType;
use crate::V128;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::any::Any;
use core::fmt;

pub struct ExternRefData {
    value: Box<dyn Any + Send + Sync>,
}

/// An opaque host reference, usable as an `externref` value. Kept behind a
/// thin pointer so it can cross the compiled-code ABI in one value slot.
#[derive(Clone)]
pub struct ExternRef(pub(crate) Arc<ExternRefData>);

impl ExternRef {
    pub fn new(value: impl Any + Send + Sync) -> Self {
        Self(Arc::new(ExternRefData {
            value: Box::new(value),
        }))
    }

    pub fn get(&self) -> &(dyn Any + Send + Sync) {
        &*self.0.value
    }
}

impl PartialEq for ExternRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ExternRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternRef({:p})", Arc::as_ptr(&self.0))
    }
}

/// A tagged runtime value.
///
/// Floats are stored as raw bits so NaN payloads survive marshalling; use
/// `f32::from_bits`/`f64::from_bits` to interpret them.
#[derive(Debug, Clone)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    V128(V128),
    FuncRef(Option<FuncRef>),
    ExternRef(Option<ExternRef>),
}

impl Value {
    pub fn type_of(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::V128(_) => ValueType::V128,
            Value::FuncRef(_) => ValueType::FuncRef,
            Value::ExternRef(_) => ValueType::ExternRef,
        }
    }

    /// The zero/null value of a type.
    pub fn default_for_type(ty: ValueType) -> Option<Value> {
        Some(match ty {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0),
            ValueType::F64 => Value::F64(0),
            ValueType::V128 => Value::V128(V128::ZERO),
            ValueType::FuncRef => Value::FuncRef(None),
            ValueType::ExternRef => Value::ExternRef(None),
            ValueType::None | ValueType::Any => return None,
        })
    }

    enum_accessors! {
        e
        (I32(i32) is_i32 as_i32 unwrap_i32 *e)
        (I64(i64) is_i64 as_i64 unwrap_i64 *e)
        (F32(f32) is_f32 as_f32 unwrap_f32 f32::from_bits(*e))
        (F64(f64) is_f64 as_f64 unwrap_f64 f64::from_bits(*e))
        (V128(V128) is_v128 as_v128 unwrap_v128 *e)
    }

    pub fn as_func_ref(&self) -> Option<&Option<FuncRef>> {
        if let Value::FuncRef(f) = self {
            Some(f)
        } else {
            None
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Value {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::I64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Value {
        Value::F32(value.to_bits())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::F64(value.to_bits())
    }
}

impl From<V128> for Value {
    fn from(value: V128) -> Value {
        Value::V128(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "i32.const {v}"),
            Value::I64(v) => write!(f, "i64.const {v}"),
            Value::F32(bits) => write!(f, "f32.const {}", f32::from_bits(*bits)),
            Value::F64(bits) => write!(f, "f64.const {}", f64::from_bits(*bits)),
            Value::V128(v) => write!(f, "v128.const {v}"),
            Value::FuncRef(Some(_)) => write!(f, "ref.func"),
            Value::FuncRef(None) => write!(f, "ref.null func"),
            Value::ExternRef(Some(_)) => write!(f, "ref.extern"),
            Value::ExternRef(None) => write!(f, "ref.null extern"),
        }
    }
}

/// An untyped 16-byte value slot, aligned for v128, used by the invocation
/// ABI's argument/result buffer.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
pub struct UntaggedValue {
    bytes: [u8; 16],
}

impl UntaggedValue {
    pub const ZERO: UntaggedValue = UntaggedValue { bytes: [0; 16] };

    pub fn from_i32(value: i32) -> Self {
        let mut slot = Self::ZERO;
        slot.bytes[..4].copy_from_slice(&value.to_le_bytes());
        slot
    }

    pub fn from_i64(value: i64) -> Self {
        let mut slot = Self::ZERO;
        slot.bytes[..8].copy_from_slice(&value.to_le_bytes());
        slot
    }

    pub fn from_f32_bits(bits: u32) -> Self {
        let mut slot = Self::ZERO;
        slot.bytes[..4].copy_from_slice(&bits.to_le_bytes());
        slot
    }

    pub fn from_f64_bits(bits: u64) -> Self {
        let mut slot = Self::ZERO;
        slot.bytes[..8].copy_from_slice(&bits.to_le_bytes());
        slot
    }

    pub fn from_v128(value: V128) -> Self {
        Self {
            bytes: *value.bytes(),
        }
    }

    pub fn from_ptr(ptr: *const ()) -> Self {
        let mut slot = Self::ZERO;
        let addr = u64::try_from(ptr as usize).unwrap();
        slot.bytes[..8].copy_from_slice(&addr.to_le_bytes());
        slot
    }

    pub fn as_i32(&self) -> i32 {
        i32::from_le_bytes(self.bytes[..4].try_into().unwrap())
    }

    pub fn as_i64(&self) -> i64 {
        i64::from_le_bytes(self.bytes[..8].try_into().unwrap())
    }

    pub fn as_f32_bits(&self) -> u32 {
        u32::from_le_bytes(self.bytes[..4].try_into().unwrap())
    }

    pub fn as_f64_bits(&self) -> u64 {
        u64::from_le_bytes(self.bytes[..8].try_into().unwrap())
    }

    pub fn as_v128(&self) -> V128 {
        V128::from_bytes(self.bytes)
    }

    pub fn as_ptr(&self) -> *const () {
        let addr = u64::from_le_bytes(self.bytes[..8].try_into().unwrap());
        usize::try_from(addr).unwrap() as *const ()
    }
}
