//! Scoped read/write lock.
//!
//! A multi-reader/single-writer lock whose acquire operations return RAII
//! scope guards: the lock is released when the guard leaves scope, in strict
//! reverse order of acquisition within one thread. The source design tracked
//! a per-thread acquisition stack so that an unbalanced release could be
//! signaled; with guard-based release an unbalanced release does not
//! typecheck, so the bookkeeping is gone and only the scope discipline
//! remains.
//!
//! On top of plain read/write scopes this lock exposes an *upgradable* read
//! scope: it coexists with readers, excludes writers and other upgradable
//! holders, and can be upgraded to a write scope without a release window in
//! between. The lobby registry uses it to make its check-then-insert
//! sequence atomic with respect to concurrent creates.

use parking_lot::{
    RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};

/// Read/write lock with scope-bound release.
///
/// Guards the lobby registry's backing map; nothing else in the server
/// shares state through this type.
#[derive(Debug, Default)]
pub struct ScopedRwLock<T> {
    inner: RwLock<T>,
}

impl<T> ScopedRwLock<T> {
    /// Wrap a value in the lock.
    pub fn new(value: T) -> Self {
        Self { inner: RwLock::new(value) }
    }

    /// Acquire a shared read scope. Readers proceed concurrently.
    pub fn read_scope(&self) -> ReadScope<'_, T> {
        ReadScope(self.inner.read())
    }

    /// Acquire an exclusive write scope, excluding all other scopes.
    pub fn write_scope(&self) -> WriteScope<'_, T> {
        WriteScope(self.inner.write())
    }

    /// Acquire an upgradable read scope.
    ///
    /// At most one upgradable scope exists at a time; it blocks writers but
    /// not plain readers, and [`UpgradableScope::upgrade`] turns it into a
    /// write scope atomically.
    pub fn upgradable_scope(&self) -> UpgradableScope<'_, T> {
        UpgradableScope(self.inner.upgradable_read())
    }
}

/// Shared read access, released when dropped.
pub struct ReadScope<'a, T>(RwLockReadGuard<'a, T>);

impl<T> std::ops::Deref for ReadScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Exclusive write access, released when dropped.
pub struct WriteScope<'a, T>(RwLockWriteGuard<'a, T>);

impl<T> std::ops::Deref for WriteScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> std::ops::DerefMut for WriteScope<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Upgradable read access, released when dropped.
pub struct UpgradableScope<'a, T>(RwLockUpgradableReadGuard<'a, T>);

impl<'a, T> UpgradableScope<'a, T> {
    /// Atomically exchange this scope for a write scope.
    ///
    /// No other writer or upgradable holder can slip in between: whatever
    /// was observed through this scope still holds when the write scope is
    /// handed back.
    pub fn upgrade(self) -> WriteScope<'a, T> {
        WriteScope(RwLockUpgradableReadGuard::upgrade(self.0))
    }
}

impl<T> std::ops::Deref for UpgradableScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}
