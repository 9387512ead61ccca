//! Service provider abstraction.
//!
//! The scheduler never constructs user services itself; it only asks an
//! optional [`ServiceProvider`] for a scope per execution and hands the
//! scoped provider to the job. Scope resources are released when the
//! scope is dropped, on every exit path of the execution body.

use std::any::{Any, TypeId};
use std::sync::Arc;

/// Error surfaced by a provider while creating a scope.
pub type ServiceError = Box<dyn std::error::Error + Send + Sync>;

/// A resolver for user-supplied services.
pub trait ServiceProvider: Send + Sync {
    /// Resolve a service instance by type id, or `None` when the
    /// provider has nothing registered for it.
    fn resolve_any(&self, ty: TypeId) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Create a nested scope. The returned scope owns any per-scope
    /// resources and releases them when dropped.
    fn create_scope(&self) -> Result<Box<dyn ServiceScope>, ServiceError>;
}

/// A live service scope.
pub trait ServiceScope: Send + Sync {
    /// The provider to use while this scope is alive.
    fn services(&self) -> Arc<dyn ServiceProvider>;
}

/// Typed convenience wrapper over [`ServiceProvider::resolve_any`].
pub fn resolve<T: Any + Send + Sync>(provider: &dyn ServiceProvider) -> Option<Arc<T>> {
    provider
        .resolve_any(TypeId::of::<T>())
        .and_then(|service| service.downcast::<T>().ok())
}
