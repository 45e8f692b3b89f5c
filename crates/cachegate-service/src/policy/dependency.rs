use chrono::{DateTime, Utc};

/// The validity of a cache item or dependency at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheValidationState {
    /// The item is usable.
    Valid,
    /// The item must not be served anymore.
    Invalid,
    /// The item is still usable but close to expiry.
    ///
    /// No built-in behavior is attached to this state; it exists as a hook for
    /// proactive refreshing.
    NearInvalid,
}

impl CacheValidationState {
    /// Combines two states: any `Invalid` dominates, then any `NearInvalid`,
    /// otherwise the result is `Valid`.
    pub fn combine(self, other: Self) -> Self {
        use CacheValidationState::*;
        match (self, other) {
            (Invalid, _) | (_, Invalid) => Invalid,
            (NearInvalid, _) | (_, NearInvalid) => NearInvalid,
            (Valid, Valid) => Valid,
        }
    }

    /// Folds a set of states with [`combine`](Self::combine). An empty set is `Valid`.
    pub fn fold(states: impl IntoIterator<Item = Self>) -> Self {
        states
            .into_iter()
            .fold(CacheValidationState::Valid, Self::combine)
    }

    /// Whether the state still permits serving the item.
    pub fn is_valid(self) -> bool {
        !matches!(self, CacheValidationState::Invalid)
    }
}

/// A validity predicate attached to a cache item.
///
/// Dependencies are runtime-only: they are consulted whenever an item's state is
/// evaluated, but they are never serialized alongside the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDependency {
    /// Valid until the given instant has passed.
    Expires(DateTime<Utc>),
    /// All children combined; the item is only as valid as its weakest child.
    ///
    /// Construct through [`combine`](Self::combine), which keeps the child list flat.
    Combined(Vec<CacheDependency>),
}

impl CacheDependency {
    /// A leaf dependency that expires at the given instant.
    pub fn expires_at(at: DateTime<Utc>) -> Self {
        Self::Expires(at)
    }

    /// Combines dependencies into one.
    ///
    /// Nested `Combined` nodes are flattened into a single flat child list, so
    /// combining is associative and the tree never grows deeper than one level.
    pub fn combine(deps: impl IntoIterator<Item = CacheDependency>) -> Self {
        let mut flat = Vec::new();
        for dep in deps {
            match dep {
                Self::Combined(children) => flat.extend(children),
                leaf => flat.push(leaf),
            }
        }
        Self::Combined(flat)
    }

    /// Evaluates this dependency at the given instant.
    pub fn state_at(&self, now: DateTime<Utc>) -> CacheValidationState {
        match self {
            Self::Expires(at) => {
                if now > *at {
                    CacheValidationState::Invalid
                } else {
                    CacheValidationState::Valid
                }
            }
            Self::Combined(children) => {
                CacheValidationState::fold(children.iter().map(|dep| dep.state_at(now)))
            }
        }
    }

    /// Evaluates this dependency now.
    pub fn state(&self) -> CacheValidationState {
        self.state_at(Utc::now())
    }
}
