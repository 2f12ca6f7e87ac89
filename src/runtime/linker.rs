use super::instance::Instance;
use super::Object;
use crate::collections::HashMap;
use crate::errors::{Error, LinkError, MissingImport};
use crate::ir::Module;
use crate::types::ExternType;
use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

/// Maps `(module_name, export_name, expected_type)` to an object.
pub trait Resolver {
    fn resolve(&self, module: &str, name: &str, expected: &ExternType) -> Option<Object>;
}

fn check_type(object: Object, expected: &ExternType) -> Option<Object> {
    let actual = object.extern_type()?;
    if ExternType::is_subtype(&actual, expected) {
        Some(object)
    } else {
        None
    }
}

/// A resolver that never resolves anything.
pub struct NullResolver;

impl Resolver for NullResolver {
    fn resolve(&self, _module: &str, _name: &str, _expected: &ExternType) -> Option<Object> {
        None
    }
}

/// Forwards every import into a single instance's exports, ignoring the
/// module name.
pub struct ModuleExportResolver {
    instance: Instance,
}

impl ModuleExportResolver {
    pub fn new(instance: Instance) -> Self {
        Self { instance }
    }
}

impl Resolver for ModuleExportResolver {
    fn resolve(&self, _module: &str, name: &str, expected: &ExternType) -> Option<Object> {
        check_type(self.instance.export(name)?, expected)
    }
}

/// Resolves imports against a registry of named intrinsic (or ordinary)
/// module instances.
#[derive(Default)]
pub struct IntrinsicResolver {
    modules: HashMap<String, Instance>,
}

impl IntrinsicResolver {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    pub fn add(&mut self, name: impl Into<String>, instance: Instance) -> &mut Self {
        self.modules.set(name.into(), instance);
        self
    }
}

impl Resolver for IntrinsicResolver {
    fn resolve(&self, module: &str, name: &str, expected: &ExternType) -> Option<Object> {
        check_type(self.modules.get(module)?.export(name)?, expected)
    }
}

/// Defers instantiation of the providing module until the first import
/// actually resolves against it.
pub struct LazyResolver<F: Fn() -> Result<Instance, Error>> {
    make: F,
    cache: Mutex<Option<Instance>>,
}

impl<F: Fn() -> Result<Instance, Error>> LazyResolver<F> {
    pub fn new(make: F) -> Self {
        Self {
            make,
            cache: Mutex::new(None),
        }
    }
}

impl<F: Fn() -> Result<Instance, Error>> Resolver for LazyResolver<F> {
    fn resolve(&self, _module: &str, name: &str, expected: &ExternType) -> Option<Object> {
        let mut cache = self.cache.lock();
        if cache.is_none() {
            match (self.make)() {
                Ok(instance) => *cache = Some(instance),
                Err(error) => {
                    tracing::warn!("lazy resolver failed to instantiate: {error}");
                    return None;
                }
            }
        }
        check_type(cache.as_ref().unwrap().export(name)?, expected)
    }
}

/// Resolves all of a module's imports in declaration order. Failures are
/// accumulated: every missing import is collected before the error is
/// raised, so tooling can report them in one pass.
pub fn link_module(module: &Module, resolver: &dyn Resolver) -> Result<Vec<Object>, LinkError> {
    let mut resolved = Vec::with_capacity(module.imports.len());
    let mut missing = Vec::new();
    for entity in &module.imports {
        let (module_name, name, expected) =
            module.import_info(*entity).expect("import out of range");
        match resolver.resolve(module_name, name, &expected) {
            Some(object) => resolved.push(object),
            None => missing.push(MissingImport {
                module: module_name.into(),
                name: name.into(),
                ty: expected,
            }),
        }
    }
    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(LinkError { missing })
    }
}
