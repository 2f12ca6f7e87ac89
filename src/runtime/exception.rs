use super::compartment::{define_gc_handle, Compartment};
use super::object::ObjectHeader;
use super::value::Value;
use crate::indices::TagId;
use crate::types::TagType;
use crate::Trap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use spin::Mutex;
use std::panic::{self, AssertUnwindSafe};

pub(crate) struct TagObject {
    pub header: ObjectHeader,
    pub ty: TagType,
}

impl TagObject {
    pub fn deep_clone(&self) -> TagObject {
        TagObject {
            header: ObjectHeader::new(self.header.debug_name.lock().clone()),
            ty: self.ty,
        }
    }
}

define_gc_handle!(
    /// A root reference to an exception type (tag) object.
    Tag,
    TagId,
    tags,
    TagObject
);

impl Tag {
    /// Creates an exception type in `compartment`.
    pub fn new(compartment: &Compartment, ty: TagType, debug_name: &str) -> Tag {
        let id = {
            let mut state = compartment.inner.state.write();
            state.tags.alloc(TagObject {
                header: ObjectHeader::new(debug_name),
                ty,
            })
        };
        Tag::from_id(compartment.inner.clone(), id)
    }

    pub fn ty(&self) -> TagType {
        self.with_object(|object| object.ty)
    }
}

/// What kind of exception was raised: one of the predefined trap types, or
/// a user-defined exception type.
#[derive(Clone)]
pub enum ExceptionTypeRef {
    Intrinsic(Trap),
    User(Tag),
}

/// A runtime exception: its type, the arguments it was thrown with, and the
/// call stack captured at the throw point.
pub struct Exception {
    pub ty: ExceptionTypeRef,
    pub arguments: Vec<Value>,
    pub call_stack: Vec<String>,
}

impl Exception {
    pub fn trap(trap: Trap) -> Self {
        Self {
            ty: ExceptionTypeRef::Intrinsic(trap),
            arguments: Vec::new(),
            call_stack: Vec::new(),
        }
    }

    pub fn user(tag: Tag, arguments: Vec<Value>) -> Self {
        Self {
            ty: ExceptionTypeRef::User(tag),
            arguments,
            call_stack: Vec::new(),
        }
    }

    pub fn is_trap(&self, trap: Trap) -> bool {
        matches!(&self.ty, ExceptionTypeRef::Intrinsic(t) if *t == trap)
    }

    pub(crate) fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.call_stack.push(frame.into());
        self
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ty {
            ExceptionTypeRef::Intrinsic(trap) => write!(f, "{trap}")?,
            ExceptionTypeRef::User(tag) => write!(f, "exception {}", tag.debug_name())?,
        }
        for frame in &self.call_stack {
            write!(f, "\n  at {frame}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Raises an exception through the platform trap channel. Only valid while
/// a [`catch_runtime_exceptions`] scope is on the stack; otherwise the
/// process-wide unhandled-exception handler runs.
pub fn throw_exception(exception: Exception) -> ! {
    panic::panic_any(exception)
}

/// Scopes a single attempt: traps raised by compiled code and exceptions
/// thrown through [`throw_exception`] inside `body` are caught and
/// returned. Other panics propagate.
pub fn catch_runtime_exceptions<T>(
    body: impl FnOnce() -> Result<T, Exception>,
) -> Result<T, Exception> {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => match payload.downcast::<Exception>() {
            Ok(exception) => Err(*exception),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

type UnhandledExceptionHandler = fn(&Exception);

static UNHANDLED_EXCEPTION_HANDLER: Mutex<Option<UnhandledExceptionHandler>> = Mutex::new(None);

/// Installs the process-wide handler invoked when an exception reaches the
/// top of a thread without a catch scope.
pub fn set_unhandled_exception_handler(handler: UnhandledExceptionHandler) {
    *UNHANDLED_EXCEPTION_HANDLER.lock() = Some(handler);
}

/// Reports an exception that escaped every catch scope to the installed
/// handler (or the log, if none is installed).
pub fn dispatch_unhandled_exception(exception: &Exception) {
    if let Some(handler) = *UNHANDLED_EXCEPTION_HANDLER.lock() {
        handler(exception);
    } else {
        tracing::error!("unhandled runtime exception: {exception}");
    }
}
