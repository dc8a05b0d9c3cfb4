use parking_lot::Mutex;

use crate::manager::{FormManager, ManagerInner};

/// Nesting depth of open transactions on one manager.
///
/// While it is non-zero, mutations queue their notifications instead of
/// delivering them.
#[derive(Default)]
pub(crate) struct TransactionDepth {
    depth: Mutex<usize>,
}

impl TransactionDepth {
    fn enter(&self) {
        *self.depth.lock() += 1;
    }

    /// Returns true when the outermost transaction closed.
    fn exit(&self) -> bool {
        let mut depth = self.depth.lock();
        *depth = depth.saturating_sub(1);
        *depth == 0
    }

    pub(crate) fn is_active(&self) -> bool {
        *self.depth.lock() > 0
    }
}

/// RAII guard that closes the transaction even when the body panics.
struct TransactionGuard<'a> {
    inner: &'a ManagerInner,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.inner.depth.exit() {
            self.inner.flush();
        }
    }
}

/// Batch several manager operations into one notification per observer.
///
/// Each operation already notifies once on its own. A transaction stretches
/// that to the whole closure: an observer touched by three changes inside it
/// renders once, with the union of the keys, when the outermost transaction
/// ends.
///
/// # Example
/// ```ignore
/// Transaction::run(&manager, || {
///     manager.change(&first, "a")?;
///     manager.change(&second, "b")?;
///     manager.blur("first");
///     Ok(())
/// })?;
/// ```
pub struct Transaction;

impl Transaction {
    /// Run `f` with notification delivery deferred to its end.
    pub fn run<F, R>(manager: &FormManager, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let inner = manager.inner();
        inner.depth.enter();
        let _guard = TransactionGuard { inner };
        f()
    }

    /// Whether a transaction is open on `manager`.
    pub fn is_active(manager: &FormManager) -> bool {
        manager.inner().depth.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldDescriptor;
    use crate::options::FormOptions;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn transaction_nesting_tracks_depth() {
        let manager = FormManager::new(FormOptions::default());
        assert!(!Transaction::is_active(&manager));

        Transaction::run(&manager, || {
            assert!(Transaction::is_active(&manager));
            Transaction::run(&manager, || {
                assert!(Transaction::is_active(&manager));
            });
            assert!(Transaction::is_active(&manager));
        });

        assert!(!Transaction::is_active(&manager));
    }

    #[test]
    fn transaction_returns_value() {
        let manager = FormManager::default();
        assert_eq!(Transaction::run(&manager, || 42), 42);
    }

    #[test]
    fn transaction_defers_and_merges_renders() {
        let manager = FormManager::default();
        let renders = Arc::new(AtomicUsize::new(0));
        let renders_clone = renders.clone();
        let handle = manager.register_field(FieldDescriptor::new("name").render(move |_, _| {
            renders_clone.fetch_add(1, Ordering::Relaxed);
        }));

        Transaction::run(&manager, || {
            manager.change(&handle, "a").unwrap();
            manager.focus("name");
            manager.blur("name");
            assert_eq!(renders.load(Ordering::Relaxed), 0);
        });

        assert_eq!(renders.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panicking_body_still_closes_the_transaction() {
        let manager = FormManager::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            Transaction::run(&manager, || panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!Transaction::is_active(&manager));
    }
}
