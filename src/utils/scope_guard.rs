/// Runs a release action exactly once: on `release()` or when dropped.
pub struct ScopeGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }

    pub fn release(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Guard over a type-erased release action
pub type ReleaseGuard = ScopeGuard<Box<dyn FnOnce() + Send>>;

pub fn release_guard(f: impl FnOnce() + Send + 'static) -> ReleaseGuard {
    ScopeGuard::new(Box::new(f))
}
