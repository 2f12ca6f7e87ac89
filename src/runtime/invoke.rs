//! The invocation ABI. The unchecked entry packs pre-typed arguments into
//! the context's scratch buffer and jumps into the function's thunk; the
//! checked entry validates argument count and types against the function's
//! signature first and marshals tagged values in both directions.

use super::context::Context;
use super::exception::{catch_runtime_exceptions, Exception};
use super::function::{FuncRef, Function, FunctionBody, FunctionData};
use super::value::{ExternRef, ExternRefData, UntaggedValue, Value};
use crate::types::{TypeTuple, ValueType};
use crate::Trap;
use alloc::sync::Arc;
use core::mem;
use smallvec::SmallVec;

fn untag(value: &Value) -> UntaggedValue {
    match value {
        Value::I32(v) => UntaggedValue::from_i32(*v),
        Value::I64(v) => UntaggedValue::from_i64(*v),
        Value::F32(bits) => UntaggedValue::from_f32_bits(*bits),
        Value::F64(bits) => UntaggedValue::from_f64_bits(*bits),
        Value::V128(v) => UntaggedValue::from_v128(*v),
        Value::FuncRef(None) | Value::ExternRef(None) => {
            UntaggedValue::from_ptr(core::ptr::null())
        }
        // The pointers are borrowed from `value`, which the caller keeps
        // alive for the duration of the call.
        Value::FuncRef(Some(func_ref)) => {
            UntaggedValue::from_ptr(Arc::as_ptr(&func_ref.0).cast())
        }
        Value::ExternRef(Some(extern_ref)) => {
            UntaggedValue::from_ptr(Arc::as_ptr(&extern_ref.0).cast())
        }
    }
}

/// Reconstructs a tagged value from a result slot.
fn tag(slot: &UntaggedValue, ty: ValueType) -> Result<Value, Exception> {
    Ok(match ty {
        ValueType::I32 => Value::I32(slot.as_i32()),
        ValueType::I64 => Value::I64(slot.as_i64()),
        ValueType::F32 => Value::F32(slot.as_f32_bits()),
        ValueType::F64 => Value::F64(slot.as_f64_bits()),
        ValueType::V128 => Value::V128(slot.as_v128()),
        ValueType::FuncRef => {
            let ptr = slot.as_ptr().cast::<FunctionData>();
            if ptr.is_null() {
                Value::FuncRef(None)
            } else {
                // SAFETY: result slots carry pointers produced by `untag`
                // from live Arcs; adopting a new count keeps them live.
                let arc = unsafe {
                    Arc::increment_strong_count(ptr);
                    Arc::from_raw(ptr)
                };
                Value::FuncRef(Some(FuncRef(arc)))
            }
        }
        ValueType::ExternRef => {
            let ptr = slot.as_ptr().cast::<ExternRefData>();
            if ptr.is_null() {
                Value::ExternRef(None)
            } else {
                // SAFETY: see the funcref case above.
                let arc = unsafe {
                    Arc::increment_strong_count(ptr);
                    Arc::from_raw(ptr)
                };
                Value::ExternRef(Some(ExternRef(arc)))
            }
        }
        ValueType::None | ValueType::Any => {
            return Err(Exception::trap(Trap::InvalidArgument));
        }
    })
}

fn tag_slice(
    slots: &[UntaggedValue],
    types: TypeTuple,
) -> Result<SmallVec<[Value; 2]>, Exception> {
    types
        .elems()
        .iter()
        .zip(slots)
        .map(|(ty, slot)| tag(slot, *ty))
        .collect()
}

/// Invokes `function` with pre-validated arguments already in untagged
/// form. The arguments are written into the context's scratch buffer, the
/// thunk runs, and the results are read back from the same buffer.
pub fn invoke_function_unchecked(
    context: &Context,
    function: &Function,
    args: &[UntaggedValue],
) -> Result<SmallVec<[UntaggedValue; 2]>, Exception> {
    let ty = function.ty();
    let mut runtime_data = context.runtime_data();

    match &function.data.body {
        FunctionBody::Intrinsic(body) => {
            let tagged: SmallVec<[Value; 2]> = ty
                .params()
                .elems()
                .iter()
                .zip(args)
                .map(|(ty, slot)| tag(slot, *ty))
                .collect::<Result<_, _>>()?;
            let results = catch_runtime_exceptions(|| body(&mut runtime_data, &tagged))
                .map_err(|e| e.with_frame(function.debug_name()))?;
            Ok(results.iter().map(untag).collect())
        }
        FunctionBody::Thunk(thunk) => {
            // Reuse the context's scratch buffer for the call frame.
            let mut buffer = context.with_object_mut(|object| mem::take(&mut object.scratch));
            buffer.clear();
            buffer.extend_from_slice(args);
            buffer.resize(
                args.len().max(ty.results().len()),
                UntaggedValue::ZERO,
            );

            let outcome = catch_runtime_exceptions(|| {
                thunk(&mut runtime_data, &mut buffer)
                    .map_err(|trap| Exception::trap(trap).with_frame(function.debug_name()))
            });

            let results: SmallVec<[UntaggedValue; 2]> = match &outcome {
                Ok(()) => buffer.iter().take(ty.results().len()).copied().collect(),
                Err(_) => SmallVec::new(),
            };
            context.with_object_mut(|object| object.scratch = buffer);
            outcome?;
            Ok(results)
        }
    }
}

/// Invokes `function` with tagged arguments, validating their number and
/// types against the signature; mismatches raise `invokeSignatureMismatch`.
pub fn invoke_function_checked(
    context: &Context,
    function: &Function,
    args: &[Value],
) -> Result<SmallVec<[Value; 2]>, Exception> {
    let ty = function.ty();
    if args.len() != ty.params().len() {
        return Err(Exception::trap(Trap::InvokeSignatureMismatch));
    }
    for (arg, expected) in args.iter().zip(ty.params().elems()) {
        if !ValueType::is_subtype(arg.type_of(), *expected) {
            return Err(Exception::trap(Trap::InvokeSignatureMismatch));
        }
    }

    match &function.data.body {
        FunctionBody::Intrinsic(body) => {
            let mut runtime_data = context.runtime_data();
            let results = catch_runtime_exceptions(|| body(&mut runtime_data, args))
                .map_err(|e| e.with_frame(function.debug_name()))?;
            Ok(results)
        }
        FunctionBody::Thunk(_) => {
            let untagged: SmallVec<[UntaggedValue; 2]> = args.iter().map(untag).collect();
            let results = invoke_function_unchecked(context, function, &untagged)?;
            tag_slice(&results, ty.results())
        }
    }
}
