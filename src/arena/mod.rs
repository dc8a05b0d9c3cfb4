// Arena-based storage for field state
//
// A manager owns exactly one FieldArena behind a RwLock. Nothing outside the
// manager mutates it; observers only hold FieldHandles, which are (name, id)
// pairs looked up on every access.

pub mod field_arena;

pub use field_arena::{Epoch, FieldDescriptor, FieldHandle, InternalId, RenderFn};

pub(crate) use field_arena::{Field, FieldArena};
