pub mod liveness;
pub mod scope_guard;

pub use liveness::Liveness;
pub use scope_guard::{release_guard, ReleaseGuard, ScopeGuard};
