//! Subscription broker: decides who re-renders after a mutation.
//!
//! A mutation is reported as `(origin, changed keys)`. The broker matches it
//! against every observer's effective subscription, queues the hits per
//! observer, and delivers each observer at most once per flush with the union
//! of its matched keys.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::arena::{FieldArena, InternalId, RenderFn};
use crate::hash::FastIndexMap;
use crate::keys::Keys;
use crate::meta::FieldState;

/// Pending deliveries, keyed by observer.
pub(crate) type Deliveries = Vec<(InternalId, Keys)>;

pub(crate) struct SubscriptionBroker {
    form_default: Option<Keys>,
    pending: Mutex<FastIndexMap<InternalId, Keys>>,
    flushing: AtomicBool,
}

impl SubscriptionBroker {
    pub(crate) fn new(form_default: Option<Keys>) -> Self {
        Self {
            form_default,
            pending: Mutex::new(FastIndexMap::default()),
            flushing: AtomicBool::new(false),
        }
    }

    /// Observers whose subscription intersects `changed`.
    ///
    /// With an `origin`, only that field's observer and form-wide observers
    /// are considered. Without one (form-wide rerender) every observer is.
    pub(crate) fn compute_affected(
        &self,
        arena: &FieldArena,
        origin: Option<InternalId>,
        changed: Keys,
    ) -> Deliveries {
        if changed.is_empty() {
            return Vec::new();
        }
        arena
            .iter()
            .filter(|field| match origin {
                Some(origin) => field.id() == origin || field.subscription.is_form_wide(),
                None => true,
            })
            .filter_map(|field| {
                let hits = field.subscription.effective(self.form_default) & changed;
                (!hits.is_empty()).then_some((field.id(), hits))
            })
            .collect()
    }

    /// Merge deliveries into the pending queue.
    pub(crate) fn queue(&self, deliveries: Deliveries) {
        if deliveries.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        for (observer, keys) in deliveries {
            let entry = pending.entry(observer).or_insert_with(Keys::empty);
            if !entry.is_empty() {
                cov_mark::hit!(deliveries_merged_per_observer);
            }
            *entry |= keys;
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Deliver everything queued.
    ///
    /// Renders run without any lock held, so they may read or mutate the
    /// manager. Mutations made by a render while a flush is running are queued
    /// and picked up by the same loop. A caller that finds another flush
    /// running leaves its deliveries to that flush, which re-checks the queue
    /// after releasing the flag.
    pub(crate) fn flush(&self, arena: &RwLock<FieldArena>) -> usize {
        let mut delivered = 0;
        loop {
            if self.flushing.swap(true, Ordering::AcqRel) {
                return delivered;
            }
            {
                let _guard = FlushGuard(&self.flushing);
                delivered += self.drain(arena);
            }
            if !self.has_pending() {
                return delivered;
            }
            cov_mark::hit!(flush_rechecked_after_release);
        }
    }

    fn drain(&self, arena: &RwLock<FieldArena>) -> usize {
        let mut delivered = 0;
        loop {
            let batch = std::mem::take(&mut *self.pending.lock());
            if batch.is_empty() {
                break;
            }

            let renders: Vec<(RenderFn, FieldState, Keys)> = {
                let arena = arena.read();
                batch
                    .into_iter()
                    .filter_map(|(observer, keys)| {
                        let field = arena.by_id(observer)?;
                        let render = field.render.clone()?;
                        Some((render, field.snapshot(), keys))
                    })
                    .collect()
            };

            for (render, state, keys) in renders {
                tracing::trace!(
                    name = %state.name,
                    internal_id = %state.internal_id,
                    %keys,
                    "notifying observer"
                );
                render(&state, keys);
                delivered += 1;
            }
        }
        delivered
    }
}

/// Clears the flushing flag even if a render panics.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
