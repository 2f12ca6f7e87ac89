//! Runtime object model tests: compartments, contexts, linking,
//! instantiation, invocation, garbage collection, cloning, and shared
//! memory wait/notify.

use karst_vm::compile::{CompiledModule, LoadedModule};
use karst_vm::indices::{EntityIndex, FuncIndex};
use karst_vm::ir::{Export, FeatureSpec, FunctionDef, Import, Module};
use karst_vm::runtime::{
    catch_runtime_exceptions, clone_compartment, clone_context, collect_compartment_garbage,
    create_compartment, create_context, instantiate_module, invoke_function_checked, link_module,
    throw_exception, try_collect_compartment, Exception, Global, IntrinsicModule,
    IntrinsicResolver, Memory, NullResolver, Object, Table, Value, WaitResult,
};
use karst_vm::types::{
    CallingConvention, FunctionType, GlobalType, IndexType, MemoryType, ReferenceType,
    SizeConstraints, TableType, TypeTuple, ValueType,
};
use karst_vm::validate::validate_module;
use karst_vm::Trap;
use std::sync::Arc;
use std::time::Duration;

fn tuple(types: &[ValueType]) -> TypeTuple {
    TypeTuple::new(types.to_vec())
}

fn env_module() -> IntrinsicModule {
    let mut env = IntrinsicModule::new("env");
    env.define_function(
        "add",
        FunctionType::new(
            tuple(&[ValueType::I32]),
            tuple(&[ValueType::I32, ValueType::I32]),
            CallingConvention::Intrinsic,
        ),
        Arc::new(|_ctx, args| {
            let a = args[0].unwrap_i32();
            let b = args[1].unwrap_i32();
            Ok(core::iter::once(Value::I32(a.wrapping_add(b))).collect())
        }),
    );
    env.define_function(
        "abort",
        FunctionType::new(
            TypeTuple::empty(),
            TypeTuple::empty(),
            CallingConvention::Intrinsic,
        ),
        Arc::new(|_ctx, _args| Err(Exception::trap(Trap::CalledAbort))),
    );
    env
}

#[test_log::test]
fn intrinsic_invocation_returns_42() -> anyhow::Result<()> {
    let compartment = create_compartment();
    let context = create_context(&compartment);
    let env = env_module().instantiate(&compartment)?;

    let add = env.exported_function("add").unwrap();
    let results = invoke_function_checked(&context, &add, &[Value::I32(7), Value::I32(35)])
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].unwrap_i32(), 42);
    Ok(())
}

#[test]
fn invoke_signature_mismatch() {
    let compartment = create_compartment();
    let context = create_context(&compartment);
    let env = env_module().instantiate(&compartment).unwrap();
    let add = env.exported_function("add").unwrap();

    let error = invoke_function_checked(&context, &add, &[Value::I32(7)]).unwrap_err();
    assert!(error.is_trap(Trap::InvokeSignatureMismatch));

    let error =
        invoke_function_checked(&context, &add, &[Value::I32(7), Value::F32(0)]).unwrap_err();
    assert!(error.is_trap(Trap::InvokeSignatureMismatch));
}

#[test]
fn traps_propagate_with_call_stack() {
    let compartment = create_compartment();
    let context = create_context(&compartment);
    let env = env_module().instantiate(&compartment).unwrap();
    let abort = env.exported_function("abort").unwrap();

    let error = invoke_function_checked(&context, &abort, &[]).unwrap_err();
    assert!(error.is_trap(Trap::CalledAbort));
    assert_eq!(error.call_stack, vec!["env.abort".to_string()]);
}

#[test]
fn thrown_exceptions_are_caught_at_the_boundary() {
    let caught = catch_runtime_exceptions(|| -> Result<(), Exception> {
        throw_exception(Exception::trap(Trap::ReachedUnreachable));
    })
    .unwrap_err();
    assert!(caught.is_trap(Trap::ReachedUnreachable));

    let ok = catch_runtime_exceptions(|| Ok(5)).unwrap();
    assert_eq!(ok, 5);
}

/// A module that imports `env.add` and `env.missing` and re-exports the
/// former.
fn importing_module() -> Module {
    let mut module = Module::new(FeatureSpec::standard());
    let ty = module.types.push(FunctionType::wasm(
        tuple(&[ValueType::I32]),
        tuple(&[ValueType::I32, ValueType::I32]),
    ));
    module.functions.imports.push(Import {
        module: "env".into(),
        name: "add".into(),
        ty,
    });
    module
        .imports
        .push(EntityIndex::Function(FuncIndex::from_u32(0)));
    module.exports.push(Export {
        name: "add2".into(),
        index: EntityIndex::Function(FuncIndex::from_u32(0)),
    });
    module
}

#[test]
fn link_collects_all_missing_imports() {
    let mut module = importing_module();
    let ty = module.types.push(FunctionType::wasm(
        TypeTuple::empty(),
        TypeTuple::empty(),
    ));
    module.functions.imports.push(Import {
        module: "env".into(),
        name: "missing".into(),
        ty,
    });
    module
        .imports
        .push(EntityIndex::Function(FuncIndex::from_u32(1)));

    let error = link_module(&module, &NullResolver).unwrap_err();
    assert_eq!(error.missing.len(), 2);
    assert_eq!(error.missing[0].name, "add");
    assert_eq!(error.missing[1].name, "missing");
}

#[test_log::test]
fn link_and_instantiate_against_intrinsics() -> anyhow::Result<()> {
    let compartment = create_compartment();
    let context = create_context(&compartment);
    let env = env_module().instantiate(&compartment)?;

    let mut resolver = IntrinsicResolver::new();
    resolver.add("env", env);

    let module = importing_module();
    validate_module(&module)?;
    let imports = link_module(&module, &resolver)?;
    assert_eq!(imports.len(), 1);

    let compiled = CompiledModule {
        module: Arc::new(module),
        loaded: LoadedModule::empty(),
    };
    let instance = instantiate_module(&context, &compiled, &imports, "demo")?;
    let add2 = instance.exported_function("add2").unwrap();
    let results = invoke_function_checked(&context, &add2, &[Value::I32(40), Value::I32(2)])
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(results[0].unwrap_i32(), 42);
    Ok(())
}

fn small_memory_type() -> MemoryType {
    MemoryType {
        shared: false,
        index_type: IndexType::I32,
        size: SizeConstraints { min: 1, max: 2 },
    }
}

#[test]
fn memory_grow_and_bounds() {
    let compartment = create_compartment();
    let memory = Memory::new(&compartment, small_memory_type()).unwrap();

    assert_eq!(memory.size(), 1);
    memory.write(0, b"hello").unwrap();
    let mut buf = [0u8; 5];
    memory.read(0, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    // An access one past the committed page traps.
    assert_eq!(
        memory.read(65536, &mut buf).unwrap_err(),
        Trap::MemoryAddressOutOfBounds
    );

    assert_eq!(memory.grow(1), Some(1));
    assert_eq!(memory.size(), 2);
    memory.write(65536, b"x").unwrap();
    // Growing past the maximum fails without changing the size.
    assert_eq!(memory.grow(1), None);
    assert_eq!(memory.size(), 2);

    assert_eq!(memory.shrink(1), Some(2));
    assert_eq!(
        memory.read(65536, &mut buf).unwrap_err(),
        Trap::MemoryAddressOutOfBounds
    );
}

#[test]
fn table_operations() {
    let compartment = create_compartment();
    let context = create_context(&compartment);
    let env = env_module().instantiate(&compartment).unwrap();
    let add = env.exported_function("add").unwrap();

    let table = Table::new(
        &compartment,
        TableType {
            element_type: ReferenceType::FuncRef,
            shared: false,
            index_type: IndexType::I32,
            size: SizeConstraints { min: 2, max: 4 },
        },
    )
    .unwrap();

    // Elements start uninitialized (null).
    assert!(matches!(table.get(0).unwrap(), Value::FuncRef(None)));
    assert_eq!(table.get(2).unwrap_err(), Trap::TableIndexOutOfBounds);

    table
        .set(1, Value::FuncRef(Some(add.as_func_ref())))
        .unwrap();
    let fetched = table.get(1).unwrap();
    let func_ref = fetched.as_func_ref().unwrap().clone().unwrap();
    let function = karst_vm::runtime::Function::from_func_ref(&compartment, &func_ref);
    let results =
        invoke_function_checked(&context, &function, &[Value::I32(1), Value::I32(2)]).unwrap();
    assert_eq!(results[0].unwrap_i32(), 3);

    assert_eq!(table.grow(2, Value::FuncRef(None)), Some(2));
    assert_eq!(table.size(), 4);
    assert_eq!(table.grow(1, Value::FuncRef(None)), None);

    table
        .fill(2, Value::FuncRef(Some(add.as_func_ref())), 2)
        .unwrap();
    assert!(matches!(table.get(3).unwrap(), Value::FuncRef(Some(_))));
    assert_eq!(
        table.fill(3, Value::FuncRef(None), 2).unwrap_err(),
        Trap::TableIndexOutOfBounds
    );

    // Type mismatch between element and table.
    assert_eq!(
        table.set(0, Value::ExternRef(None)).unwrap_err(),
        Trap::InvalidArgument
    );
}

#[test]
fn mutable_globals_are_per_context() {
    let compartment = create_compartment();
    let ctx1 = create_context(&compartment);

    let global = Global::new(
        &compartment,
        GlobalType {
            value_type: ValueType::I32,
            is_mutable: true,
        },
        Value::I32(5),
    )
    .unwrap();

    // A context created before the global still gets a cell.
    let ctx2 = create_context(&compartment);

    global.set(&ctx1.runtime_data(), Value::I32(7)).unwrap();
    assert_eq!(global.get(&ctx1.runtime_data()).unwrap_i32(), 7);
    assert_eq!(global.get(&ctx2.runtime_data()).unwrap_i32(), 5);

    // Cloning a context copies its snapshot.
    let ctx3 = clone_context(&ctx1, &compartment);
    assert_eq!(global.get(&ctx3.runtime_data()).unwrap_i32(), 7);

    // Immutable globals reject writes.
    let frozen = Global::new(
        &compartment,
        GlobalType {
            value_type: ValueType::I32,
            is_mutable: false,
        },
        Value::I32(1),
    )
    .unwrap();
    assert_eq!(
        frozen.set(&ctx1.runtime_data(), Value::I32(2)).unwrap_err(),
        Trap::InvalidArgument
    );
}

#[test]
fn gc_collects_unrooted_objects_and_compartments() {
    let compartment = create_compartment();
    {
        let memory = Memory::new(&compartment, small_memory_type()).unwrap();
        collect_compartment_garbage(&compartment);
        // Rooted objects survive collection.
        memory.write(0, b"still here").unwrap();
    }
    collect_compartment_garbage(&compartment);
    assert!(try_collect_compartment(compartment));
}

#[test]
fn rooting_a_function_roots_its_instance() {
    let compartment = create_compartment();
    let context = create_context(&compartment);

    // A module with one defined (empty) function.
    let mut module = Module::new(FeatureSpec::standard());
    let ty = module.types.push(FunctionType::wasm(
        TypeTuple::empty(),
        TypeTuple::empty(),
    ));
    module.functions.defs.push(FunctionDef {
        type_index: ty,
        locals: vec![],
        code: vec![0x0B], // end
    });
    module.exports.push(Export {
        name: "f".into(),
        index: EntityIndex::Function(FuncIndex::from_u32(0)),
    });
    validate_module(&module).unwrap();

    let thunk: karst_vm::compile::FunctionThunk = Arc::new(
        |_ctx: &mut karst_vm::runtime::ContextRuntimeData,
         _buffer: &mut [karst_vm::runtime::UntaggedValue]| {
            Err(Trap::CalledUnimplementedIntrinsic)
        },
    );
    let compiled = CompiledModule {
        module: Arc::new(module),
        loaded: LoadedModule::new([thunk]),
    };

    let function = {
        let instance = instantiate_module(&context, &compiled, &[], "gc-test").unwrap();
        instance.exported_function("f").unwrap()
        // The instance handle drops here; only the function roots it now.
    };

    collect_compartment_garbage(&compartment);
    // The instance must have survived: invoking the function reaches its
    // (stub) compiled body.
    let error = invoke_function_checked(&context, &function, &[]).unwrap_err();
    assert!(error.is_trap(Trap::CalledUnimplementedIntrinsic));

    drop(function);
    drop(context);
    collect_compartment_garbage(&compartment);
    assert!(try_collect_compartment(compartment));
}

#[test]
fn cloned_compartments_are_bit_identical_then_independent() {
    let compartment = create_compartment();
    let memory = Memory::new(&compartment, small_memory_type()).unwrap();
    memory.write(0, b"snapshot").unwrap();

    let clone = clone_compartment(&compartment);
    let cloned_memory = memory.remap_to_cloned_compartment(&clone).unwrap();

    let mut buf = [0u8; 8];
    cloned_memory.read(0, &mut buf).unwrap();
    assert_eq!(&buf, b"snapshot");

    // Mutation after the clone is independent in both directions.
    memory.write(0, b"mutated!").unwrap();
    cloned_memory.read(0, &mut buf).unwrap();
    assert_eq!(&buf, b"snapshot");

    cloned_memory.write(0, b"altered!").unwrap();
    memory.read(0, &mut buf).unwrap();
    assert_eq!(&buf, b"mutated!");
}

#[test]
fn cloned_instances_resolve_their_own_functions() {
    let compartment = create_compartment();
    let context = create_context(&compartment);
    let env = env_module().instantiate(&compartment).unwrap();

    let mut resolver = IntrinsicResolver::new();
    resolver.add("env", env.clone());
    let module = importing_module();
    let imports = link_module(&module, &resolver).unwrap();
    let compiled = CompiledModule {
        module: Arc::new(module),
        loaded: LoadedModule::empty(),
    };
    let instance = instantiate_module(&context, &compiled, &imports, "original").unwrap();

    let clone = clone_compartment(&compartment);
    let cloned_instance = instance.remap_to_cloned_compartment(&clone).unwrap();
    let cloned_context = create_context(&clone);
    let add2 = cloned_instance.exported_function("add2").unwrap();
    let results =
        invoke_function_checked(&cloned_context, &add2, &[Value::I32(20), Value::I32(22)])
            .unwrap();
    assert_eq!(results[0].unwrap_i32(), 42);
}

fn shared_memory_type() -> MemoryType {
    MemoryType {
        shared: true,
        index_type: IndexType::I32,
        size: SizeConstraints { min: 1, max: 1 },
    }
}

#[test]
fn atomic_wait_not_equal_and_timeout() {
    let compartment = create_compartment();
    let memory = Memory::new(&compartment, shared_memory_type()).unwrap();

    memory.write(0, &1u32.to_le_bytes()).unwrap();
    assert_eq!(
        memory.atomic_wait32(0, 0, None).unwrap(),
        WaitResult::NotEqual
    );
    assert_eq!(
        memory
            .atomic_wait32(0, 1, Some(5_000_000)) // 5ms
            .unwrap(),
        WaitResult::TimedOut
    );

    // Misaligned and unshared accesses are rejected.
    assert_eq!(
        memory.atomic_wait32(2, 0, None).unwrap_err(),
        Trap::MisalignedAtomicMemoryAccess
    );
    let unshared = Memory::new(&compartment, small_memory_type()).unwrap();
    assert_eq!(
        unshared.atomic_wait32(0, 0, None).unwrap_err(),
        Trap::InvalidArgument
    );
    assert_eq!(unshared.atomic_notify(0, 1).unwrap(), 0);
}

#[test]
fn atomic_notify_wakes_a_waiter() {
    let compartment = create_compartment();
    let memory = Memory::new(&compartment, shared_memory_type()).unwrap();
    memory.write(0, &0u32.to_le_bytes()).unwrap();

    let waiter_memory = memory.clone();
    let waiter = std::thread::spawn(move || {
        waiter_memory
            .atomic_wait32(0, 0, Some(5_000_000_000))
            .unwrap()
    });

    // Give the waiter time to park, then release it.
    std::thread::sleep(Duration::from_millis(50));
    memory.write(0, &1u32.to_le_bytes()).unwrap();
    let woken = memory.atomic_notify(0, u32::MAX).unwrap();
    assert_eq!(woken, 1);
    assert_eq!(waiter.join().unwrap(), WaitResult::Woken);
}

#[test]
fn extern_type_of_objects() {
    let compartment = create_compartment();
    let memory = Memory::new(&compartment, small_memory_type()).unwrap();
    let object = Object::Memory(memory);
    match object.extern_type().unwrap() {
        karst_vm::types::ExternType::Memory(ty) => assert_eq!(ty.size.min, 1),
        other => panic!("unexpected extern type {other}"),
    }
}
