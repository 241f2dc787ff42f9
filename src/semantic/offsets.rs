//! Member-offset memoization.
//!
//! Offset computation can cost remote reads (dynamic class dispatch reads
//! the instance's metadata), so resolved offsets are cached per type handle
//! and member name. The handle's embedded generation keeps entries from a
//! torn-down context from ever answering for its replacement.

use dashmap::DashMap;

use crate::types::TypeIdentity;

/// Cache of resolved member byte offsets.
#[derive(Default)]
pub struct MemberOffsetCache {
    offsets: DashMap<(TypeIdentity, String), u64>,
}

impl MemberOffsetCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        MemberOffsetCache::default()
    }

    /// The cached offset of `member` within `ty`, if one was recorded.
    #[must_use]
    pub fn get(&self, ty: TypeIdentity, member: &str) -> Option<u64> {
        self.offsets.get(&(ty, member.to_string())).map(|r| *r)
    }

    /// Record a resolved offset.
    pub fn insert(&self, ty: TypeIdentity, member: &str, offset: u64) {
        self.offsets.insert((ty, member.to_string()), offset);
    }

    /// Drop every entry whose type handle belongs to the given context
    /// generation.
    pub fn purge_generation(&self, generation: u64) {
        self.offsets.retain(|(ty, _), _| ty.context != generation);
    }

    /// Number of cached offsets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_miss_and_purge() {
        let cache = MemberOffsetCache::new();
        let ty = TypeIdentity { context: 7, index: 0 };
        assert_eq!(cache.get(ty, "count"), None);

        cache.insert(ty, "count", 16);
        assert_eq!(cache.get(ty, "count"), Some(16));
        assert_eq!(cache.get(ty, "other"), None);

        cache.purge_generation(7);
        assert!(cache.is_empty());
    }
}
