//! Map identity tracking
//!
//! A map is fully determined by its seed, world type and format version. The
//! tracker remembers the last observed triple and reports when it changes.

use std::fmt;

/// The (seed, world type, format version) triple naming one map
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub seed: Option<i64>,
    pub world_type: Option<String>,
    pub version: Option<String>,
}

impl Identity {
    pub fn new(seed: Option<i64>, world_type: Option<&str>, version: Option<&str>) -> Self {
        Self {
            seed,
            world_type: non_empty(world_type),
            version: non_empty(version),
        }
    }

    /// True when every field is present, i.e. the map can be requested
    pub fn is_complete(&self) -> bool {
        self.seed.is_some() && self.world_type.is_some() && self.version.is_some()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "seed: {}, version: {}, type: {}",
            self.seed.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            show(&self.version),
            show(&self.world_type),
        )
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Remembers the last identity and detects changes
#[derive(Debug, Default)]
pub struct IdentityTracker {
    current: Identity,
}

impl IdentityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Identity {
        &self.current
    }

    /// Record a new observation.
    ///
    /// The stored snapshot is always updated. Returns true only when some field
    /// differs from the previous snapshot and the new identity is complete, so
    /// filling in a missing field later still reports a change.
    pub fn check(&mut self, seed: Option<i64>, world_type: Option<&str>, version: Option<&str>) -> bool {
        self.observe(Identity::new(seed, world_type, version))
    }

    /// Same as [`check`](Self::check) for an already built identity
    pub fn observe(&mut self, next: Identity) -> bool {
        let changed = next != self.current;
        self.current = next;
        changed && self.current.is_complete()
    }
}
