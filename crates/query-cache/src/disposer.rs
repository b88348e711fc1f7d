//! A call-once handle returned by `subscribe`/`on_change`.

/// Disposes a subscription when invoked. Unlike an RAII guard, this
/// does **not** unsubscribe on drop: a caller that drops the handle
/// without calling [`Disposer::dispose`] keeps the subscription alive.
pub struct Disposer(Option<Box<dyn FnOnce() + Send>>);

impl Disposer {
    pub(crate) fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// Remove the subscription. A second call is a no-op.
    pub fn dispose(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer").finish_non_exhaustive()
    }
}
