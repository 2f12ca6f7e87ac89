//! Containers used throughout the engine: Robin-Hood hash map/set, a
//! forward-only arena for scope-bounded scratch allocations, and a bounded
//! inline vector.

mod arena;
mod hash_map;
mod hash_set;
mod hash_table;
mod inline_array;

pub use arena::{Arena, ArenaMark, ScopedArena};
pub use hash_map::HashMap;
pub use hash_set::HashSet;
pub use hash_table::SpaceUsage;
pub use inline_array::InlineArray;
