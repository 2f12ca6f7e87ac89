use alloc::boxed::Box;
use alloc::string::String;
use core::any::Any;
use core::sync::atomic::AtomicUsize;
use spin::Mutex;

/// State common to every garbage-collected object: its root-reference
/// counter, an optional debug name, and a user-data slot.
///
/// The object's back-reference to its compartment is implicit: objects live
/// inside their compartment's object vectors, and the compartment outlives
/// all of them.
pub(crate) struct ObjectHeader {
    pub root_count: AtomicUsize,
    pub debug_name: Mutex<String>,
    pub user_data: Mutex<Option<Box<dyn Any + Send>>>,
}

impl ObjectHeader {
    pub fn new(debug_name: impl Into<String>) -> Self {
        Self {
            root_count: AtomicUsize::new(0),
            debug_name: Mutex::new(debug_name.into()),
            user_data: Mutex::new(None),
        }
    }
}
