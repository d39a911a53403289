//! Immutable identity-catalog snapshots.
//!
//! The backing collaborator rebuilds a pool's identity list whenever its
//! data changes; each rebuild is swapped in atomically as a new `Arc`
//! snapshot. A recognition pass that already holds a snapshot keeps
//! matching against it — it never observes a half-updated catalog.

use std::sync::{Arc, RwLock};

use attest_core::KnownIdentity;
use serde::{Deserialize, Serialize};

/// Which enrolled population an action searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityPool {
    Instructors,
    Students,
    /// Students holding delegate authority, used for session approval.
    DelegateStudents,
}

/// Atomic snapshot store, one slot per identity pool.
pub struct CatalogStore {
    instructors: RwLock<Arc<Vec<KnownIdentity>>>,
    students: RwLock<Arc<Vec<KnownIdentity>>>,
    delegates: RwLock<Arc<Vec<KnownIdentity>>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self {
            instructors: RwLock::new(Arc::new(Vec::new())),
            students: RwLock::new(Arc::new(Vec::new())),
            delegates: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn slot(&self, pool: IdentityPool) -> &RwLock<Arc<Vec<KnownIdentity>>> {
        match pool {
            IdentityPool::Instructors => &self.instructors,
            IdentityPool::Students => &self.students,
            IdentityPool::DelegateStudents => &self.delegates,
        }
    }

    /// Swap in a freshly rebuilt identity list for a pool.
    pub fn replace(&self, pool: IdentityPool, identities: Vec<KnownIdentity>) {
        let snapshot = Arc::new(identities);
        match self.slot(pool).write() {
            Ok(mut slot) => {
                tracing::debug!(?pool, count = snapshot.len(), "catalog snapshot replaced");
                *slot = snapshot;
            }
            Err(poisoned) => {
                *poisoned.into_inner() = snapshot;
            }
        }
    }

    /// Current snapshot for a pool. Cheap; callers hold the `Arc` for the
    /// duration of one recognition pass.
    pub fn snapshot(&self, pool: IdentityPool) -> Arc<Vec<KnownIdentity>> {
        match self.slot(pool).read() {
            Ok(slot) => Arc::clone(&slot),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}
