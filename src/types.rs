//! Value types, interned type tuples and function types, and the
//! table/memory/global/exception types used by both the IR and the runtime.

use crate::collections::HashMap;
use crate::enum_accessors;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Deref;
use core::ptr;
use spin::{Mutex, Once};

/// A tagged scalar kind.
///
/// `None` is the bottom type, used at unreachable stack positions; `Any` is
/// the top type, used where any value may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    None,
    Any,
    I32,
    I64,
    F32,
    F64,
    V128,
    ExternRef,
    FuncRef,
}

impl ValueType {
    /// `X ≤ X`; `none ≤ X` for all X; `X ≤ any` for all X.
    #[inline]
    pub fn is_subtype(sub: ValueType, sup: ValueType) -> bool {
        sub == sup || sub == ValueType::None || sup == ValueType::Any
    }

    #[inline]
    pub fn is_reference(self) -> bool {
        matches!(self, ValueType::ExternRef | ValueType::FuncRef)
    }

    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ValueType::I32 | ValueType::I64 | ValueType::F32 | ValueType::F64 | ValueType::V128
        )
    }

    /// Byte width of one value in the invocation scratch buffer.
    pub fn num_bytes(self) -> usize {
        match self {
            ValueType::V128 => 16,
            _ => 8,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::None => "none",
            ValueType::Any => "any",
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::V128 => "v128",
            ValueType::ExternRef => "externref",
            ValueType::FuncRef => "funcref",
        };
        f.write_str(name)
    }
}

/// The reference types usable as table elements and `ref.null` operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    FuncRef,
    ExternRef,
}

impl From<ReferenceType> for ValueType {
    fn from(ty: ReferenceType) -> ValueType {
        match ty {
            ReferenceType::FuncRef => ValueType::FuncRef,
            ReferenceType::ExternRef => ValueType::ExternRef,
        }
    }
}

impl TryFrom<ValueType> for ReferenceType {
    type Error = ();

    fn try_from(ty: ValueType) -> Result<Self, ()> {
        match ty {
            ValueType::FuncRef => Ok(ReferenceType::FuncRef),
            ValueType::ExternRef => Ok(ReferenceType::ExternRef),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&ValueType::from(*self), f)
    }
}

/// Whether a memory or table is indexed by i32 or i64 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    I32,
    I64,
}

impl IndexType {
    #[inline]
    pub fn value_type(self) -> ValueType {
        match self {
            IndexType::I32 => ValueType::I32,
            IndexType::I64 => ValueType::I64,
        }
    }
}

pub struct TypeTupleData {
    elems: Box<[ValueType]>,
}

/// An immutable, globally interned sequence of value types.
///
/// Two tuples with the same elements share one representation and compare
/// equal by address. The interning table is process-wide and thread-safe.
#[derive(Clone, Copy)]
pub struct TypeTuple(&'static TypeTupleData);

impl TypeTuple {
    pub fn new(elems: impl Into<Box<[ValueType]>>) -> Self {
        let elems = elems.into();
        let mut interner = interner().lock();
        if let Some(data) = interner.tuples.get(&elems[..]).copied() {
            return TypeTuple(data);
        }
        let data: &'static TypeTupleData = Box::leak(Box::new(TypeTupleData { elems }));
        let key: &'static [ValueType] = &data.elems;
        interner.tuples.add(key, data);
        TypeTuple(data)
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[inline]
    pub fn elems(&self) -> &'static [ValueType] {
        &self.0.elems
    }
}

impl Deref for TypeTuple {
    type Target = [ValueType];
    fn deref(&self) -> &[ValueType] {
        &self.0.elems
    }
}

impl PartialEq for TypeTuple {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for TypeTuple {}

impl Hash for TypeTuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        ptr::from_ref(self.0).hash(state);
    }
}

impl fmt::Debug for TypeTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.elems()).finish()
    }
}

impl fmt::Display for TypeTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, elem) in self.elems().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{elem}")?;
        }
        write!(f, ")")
    }
}

impl FromIterator<ValueType> for TypeTuple {
    fn from_iter<I: IntoIterator<Item = ValueType>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect::<Vec<_>>())
    }
}

/// How a function expects to be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    Wasm,
    Intrinsic,
    IntrinsicWithContextSwitch,
    C,
    CApiCallback,
}

pub struct FunctionTypeData {
    results: TypeTuple,
    params: TypeTuple,
    calling_convention: CallingConvention,
}

/// A globally interned function type; compared by address.
#[derive(Clone, Copy)]
pub struct FunctionType(&'static FunctionTypeData);

impl FunctionType {
    pub fn new(
        results: TypeTuple,
        params: TypeTuple,
        calling_convention: CallingConvention,
    ) -> Self {
        let key = (results, params, calling_convention);
        let mut interner = interner().lock();
        if let Some(data) = interner.functions.get(&key).copied() {
            return FunctionType(data);
        }
        let data: &'static FunctionTypeData = Box::leak(Box::new(FunctionTypeData {
            results,
            params,
            calling_convention,
        }));
        interner.functions.add(key, data);
        FunctionType(data)
    }

    /// A `wasm` calling-convention function type.
    pub fn wasm(results: TypeTuple, params: TypeTuple) -> Self {
        Self::new(results, params, CallingConvention::Wasm)
    }

    #[inline]
    pub fn results(&self) -> TypeTuple {
        self.0.results
    }

    #[inline]
    pub fn params(&self) -> TypeTuple {
        self.0.params
    }

    #[inline]
    pub fn calling_convention(&self) -> CallingConvention {
        self.0.calling_convention
    }
}

impl PartialEq for FunctionType {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.0, other.0)
    }
}

impl Eq for FunctionType {}

impl Hash for FunctionType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        ptr::from_ref(self.0).hash(state);
    }
}

impl fmt::Debug for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.params(), self.results())
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.params(), self.results())
    }
}

struct Interner {
    tuples: HashMap<&'static [ValueType], &'static TypeTupleData>,
    functions: HashMap<(TypeTuple, TypeTuple, CallingConvention), &'static FunctionTypeData>,
}

fn interner() -> &'static Mutex<Interner> {
    static INTERNER: Once<Mutex<Interner>> = Once::new();
    INTERNER.call_once(|| {
        Mutex::new(Interner {
            tuples: HashMap::new(),
            functions: HashMap::new(),
        })
    })
}

/// Minimum and maximum size of a table (in elements) or memory (in pages).
/// `max == u64::MAX` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SizeConstraints {
    pub min: u64,
    pub max: u64,
}

impl SizeConstraints {
    pub const UNBOUNDED: u64 = u64::MAX;

    pub fn at_least(min: u64) -> Self {
        Self {
            min,
            max: Self::UNBOUNDED,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.max != Self::UNBOUNDED
    }

    /// `a` is usable where `b` is expected iff `a`'s range lies within `b`'s.
    pub fn is_subset(a: SizeConstraints, b: SizeConstraints) -> bool {
        a.min >= b.min && a.max <= b.max
    }
}

impl fmt::Display for SizeConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bounded() {
            write!(f, "{}..{}", self.min, self.max)
        } else {
            write!(f, "{}..", self.min)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableType {
    pub element_type: ReferenceType,
    pub shared: bool,
    pub index_type: IndexType,
    pub size: SizeConstraints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryType {
    pub shared: bool,
    pub index_type: IndexType,
    pub size: SizeConstraints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub is_mutable: bool,
}

impl GlobalType {
    /// Immutable globals are covariant in their value type; mutable globals
    /// are invariant.
    pub fn is_subtype(sub: GlobalType, sup: GlobalType) -> bool {
        if sub.is_mutable != sup.is_mutable {
            return false;
        }
        if sup.is_mutable {
            sub.value_type == sup.value_type
        } else {
            ValueType::is_subtype(sub.value_type, sup.value_type)
        }
    }
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_mutable {
            write!(f, "(mut {})", self.value_type)
        } else {
            fmt::Display::fmt(&self.value_type, f)
        }
    }
}

/// The type of an exception tag: the parameters thrown with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagType {
    pub params: TypeTuple,
}

/// The kinds of objects that can be imported and exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternKind {
    Function,
    Table,
    Memory,
    Global,
    Tag,
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternKind::Function => "func",
            ExternKind::Table => "table",
            ExternKind::Memory => "memory",
            ExternKind::Global => "global",
            ExternKind::Tag => "tag",
        };
        f.write_str(name)
    }
}

/// The type of an importable or exportable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternType {
    Function(FunctionType),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
    Tag(TagType),
}

impl ExternType {
    pub fn kind(&self) -> ExternKind {
        match self {
            ExternType::Function(_) => ExternKind::Function,
            ExternType::Table(_) => ExternKind::Table,
            ExternType::Memory(_) => ExternKind::Memory,
            ExternType::Global(_) => ExternKind::Global,
            ExternType::Tag(_) => ExternKind::Tag,
        }
    }

    /// Whether an object of type `sub` satisfies an import of type `sup`.
    pub fn is_subtype(sub: &ExternType, sup: &ExternType) -> bool {
        match (sub, sup) {
            // Calling conventions are bridged by thunks, so imports match on
            // the parameter and result tuples alone.
            (ExternType::Function(a), ExternType::Function(b)) => {
                a.params() == b.params() && a.results() == b.results()
            }
            (ExternType::Table(a), ExternType::Table(b)) => {
                a.element_type == b.element_type
                    && a.shared == b.shared
                    && a.index_type == b.index_type
                    && SizeConstraints::is_subset(a.size, b.size)
            }
            (ExternType::Memory(a), ExternType::Memory(b)) => {
                a.shared == b.shared
                    && a.index_type == b.index_type
                    && SizeConstraints::is_subset(a.size, b.size)
            }
            (ExternType::Global(a), ExternType::Global(b)) => GlobalType::is_subtype(*a, *b),
            (ExternType::Tag(a), ExternType::Tag(b)) => a.params == b.params,
            _ => false,
        }
    }

    enum_accessors! {
        e
        (Function(FunctionType) is_function function unwrap_function *e)
        (Table(TableType) is_table table unwrap_table *e)
        (Memory(MemoryType) is_memory memory unwrap_memory *e)
        (Global(GlobalType) is_global global unwrap_global *e)
        (Tag(TagType) is_tag tag unwrap_tag *e)
    }
}

impl fmt::Display for ExternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternType::Function(ty) => write!(f, "func {ty}"),
            ExternType::Table(ty) => write!(
                f,
                "table {} {} {}",
                ty.size, ty.element_type,
                if ty.shared { "shared" } else { "" }
            ),
            ExternType::Memory(ty) => write!(
                f,
                "memory {} {}",
                ty.size,
                if ty.shared { "shared" } else { "" }
            ),
            ExternType::Global(ty) => write!(f, "global {ty}"),
            ExternType::Tag(ty) => write!(f, "tag {}", ty.params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuples_are_interned() {
        let a = TypeTuple::new(alloc::vec![ValueType::I32, ValueType::F64]);
        let b = TypeTuple::new(alloc::vec![ValueType::I32, ValueType::F64]);
        let c = TypeTuple::new(alloc::vec![ValueType::F64, ValueType::I32]);
        assert_eq!(a, b);
        assert!(ptr::eq(a.0, b.0));
        assert_ne!(a, c);
        assert_eq!(a.elems(), &[ValueType::I32, ValueType::F64]);
    }

    #[test]
    fn function_types_are_interned() {
        let results = TypeTuple::new(alloc::vec![ValueType::I32]);
        let params = TypeTuple::new(alloc::vec![ValueType::I32, ValueType::I32]);
        let a = FunctionType::wasm(results, params);
        let b = FunctionType::wasm(results, params);
        assert_eq!(a, b);
        assert!(ptr::eq(a.0, b.0));
        let c = FunctionType::new(results, params, CallingConvention::Intrinsic);
        assert_ne!(a, c);
    }

    #[test]
    fn value_subtyping() {
        for ty in [
            ValueType::I32,
            ValueType::V128,
            ValueType::FuncRef,
            ValueType::Any,
        ] {
            assert!(ValueType::is_subtype(ty, ty));
            assert!(ValueType::is_subtype(ValueType::None, ty));
            assert!(ValueType::is_subtype(ty, ValueType::Any));
        }
        assert!(!ValueType::is_subtype(ValueType::I32, ValueType::I64));
        assert!(!ValueType::is_subtype(ValueType::Any, ValueType::I32));
    }

    #[test]
    fn extern_subtyping() {
        let small = SizeConstraints { min: 2, max: 10 };
        let big = SizeConstraints {
            min: 1,
            max: SizeConstraints::UNBOUNDED,
        };
        assert!(SizeConstraints::is_subset(small, big));
        assert!(!SizeConstraints::is_subset(big, small));

        let sub = ExternType::Memory(MemoryType {
            shared: false,
            index_type: IndexType::I32,
            size: small,
        });
        let sup = ExternType::Memory(MemoryType {
            shared: false,
            index_type: IndexType::I32,
            size: big,
        });
        assert!(ExternType::is_subtype(&sub, &sup));
        assert!(!ExternType::is_subtype(&sup, &sub));

        let mutable = GlobalType {
            value_type: ValueType::I32,
            is_mutable: true,
        };
        assert!(GlobalType::is_subtype(mutable, mutable));
        assert!(!GlobalType::is_subtype(
            mutable,
            GlobalType {
                value_type: ValueType::I32,
                is_mutable: false
            }
        ));
    }
}
