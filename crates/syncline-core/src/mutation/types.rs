use crate::scheduler::SourceKey;

/// Declarative description of a mutation's cache footprint.
///
/// Built once per mutation site, next to the request code, so the set of
/// invalidated sources is reviewable in one place.
#[derive(Debug, Clone)]
pub struct MutationSpec {
    pub name: &'static str,
    /// Exact keys marked stale on success.
    pub keys: Vec<SourceKey>,
    /// Prefixes whose every known key is marked stale on success.
    pub prefixes: Vec<SourceKey>,
}

impl MutationSpec {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            keys: Vec::new(),
            prefixes: Vec::new(),
        }
    }

    pub fn invalidates(mut self, key: SourceKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn invalidates_prefix(mut self, prefix: SourceKey) -> Self {
        self.prefixes.push(prefix);
        self
    }
}
