//! Zero-sized hash builder for the manager's internal indexes.
//!
//! Field ids and observer keys are produced by the manager itself, so HashDoS
//! resistance buys nothing here. `FastHashBuilder` uses foldhash with a fixed
//! seed and adds no per-map memory.

use std::collections::HashMap;
use std::hash::BuildHasher;

use foldhash::fast::{FixedState, FoldHasher};
use indexmap::IndexMap;

/// A zero-sized BuildHasher that uses foldhash with a fixed seed.
///
/// All instances produce identical hashes, so maps built with it can be
/// created in `const`-like contexts via `Default`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FastHashBuilder;

impl BuildHasher for FastHashBuilder {
    type Hasher = FoldHasher<'static>;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        FixedState::with_seed(0x517cc1b727220a95).build_hasher()
    }
}

/// `HashMap` keyed by manager-issued ids.
pub(crate) type FastHashMap<K, V> = HashMap<K, V, FastHashBuilder>;

/// Insertion-ordered map used for pending notification queues.
pub(crate) type FastIndexMap<K, V> = IndexMap<K, V, FastHashBuilder>;
