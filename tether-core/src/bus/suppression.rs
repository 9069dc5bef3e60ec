//! Suppression registry
//!
//! Error ids the user has dismissed. A suppressed id is never published
//! again until it is unsuppressed or the registry is cleared.

use crate::core::ErrorId;
use dashmap::DashSet;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SuppressionRegistry {
    ids: DashSet<ErrorId>,
}

impl SuppressionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already suppressed
    pub fn suppress(&self, id: &ErrorId) -> bool {
        let inserted = self.ids.insert(id.clone());
        if inserted {
            debug!(%id, "Suppressing notifications");
        }
        inserted
    }

    pub fn is_suppressed(&self, id: &ErrorId) -> bool {
        self.ids.contains(id)
    }

    pub fn unsuppress(&self, id: &ErrorId) -> bool {
        self.ids.remove(id).is_some()
    }

    pub fn clear_suppressed(&self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
