use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{CacheError, CacheResult};

use super::dependency::{CacheDependency, CacheValidationState};

/// The preset priority levels a backend can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriorityLevel {
    Low,
    #[default]
    Default,
    High,
}

/// The storage priority of a cache item.
///
/// Consists of one of three preset levels, optionally refined by a free-form
/// single-line hint that specific backends may understand.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CachePriority {
    level: PriorityLevel,
    hint: Option<String>,
}

impl CachePriority {
    /// The preset low priority.
    pub fn low() -> Self {
        PriorityLevel::Low.into()
    }

    /// The preset high priority.
    pub fn high() -> Self {
        PriorityLevel::High.into()
    }

    /// Creates a priority carrying a backend-specific hint.
    ///
    /// The serialized form of a policy item is a single line, so a hint containing a
    /// newline is rejected.
    pub fn with_hint(level: PriorityLevel, hint: impl Into<String>) -> CacheResult<Self> {
        let hint = hint.into();
        if hint.contains('\n') {
            return Err(CacheError::Validation(
                "priority hint cannot contain a newline character".into(),
            ));
        }
        Ok(Self {
            level,
            hint: Some(hint),
        })
    }

    /// The preset level of this priority.
    pub fn level(&self) -> PriorityLevel {
        self.level
    }

    /// The backend-specific hint, if any.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Whether this is a high priority.
    pub fn is_high(&self) -> bool {
        self.level == PriorityLevel::High
    }

    /// Whether this is a low priority.
    pub fn is_low(&self) -> bool {
        self.level == PriorityLevel::Low
    }
}

impl From<PriorityLevel> for CachePriority {
    fn from(level: PriorityLevel) -> Self {
        Self { level, hint: None }
    }
}

impl fmt::Display for CachePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            PriorityLevel::Low => "Low",
            PriorityLevel::Default => "Default",
            PriorityLevel::High => "High",
        };
        match &self.hint {
            Some(hint) => write!(f, "{level}:{hint}"),
            None => f.write_str(level),
        }
    }
}

impl FromStr for CachePriority {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (level, hint) = match s.split_once(':') {
            Some((level, hint)) => (level, Some(hint)),
            None => (s, None),
        };

        let level = match level {
            "Low" => PriorityLevel::Low,
            "Default" => PriorityLevel::Default,
            "High" => PriorityLevel::High,
            other => {
                return Err(CacheError::Validation(format!(
                    "unknown cache priority `{other}`"
                )));
            }
        };

        match hint {
            Some(hint) => Self::with_hint(level, hint),
            None => Ok(level.into()),
        }
    }
}

/// The concrete, immutable policy stamped onto a value when it is stored.
///
/// A policy item never changes after construction; adjusting the priority produces a
/// new item. The expiration is always a UTC instant, which the `DateTime<Utc>` type
/// guarantees by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicyItem {
    expires_at: DateTime<Utc>,
    priority: CachePriority,
    dependencies: Option<CacheDependency>,
}

impl CachePolicyItem {
    /// Creates a policy item expiring at the given instant, with default priority and
    /// no dependencies.
    pub fn new(expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at,
            priority: CachePriority::default(),
            dependencies: None,
        }
    }

    /// A policy item that is already invalid.
    pub fn expired() -> Self {
        Self::new(DateTime::UNIX_EPOCH)
    }

    /// Returns a new item with the given priority.
    pub fn set_priority(self, priority: CachePriority) -> Self {
        Self { priority, ..self }
    }

    /// Returns a new item with the given dependency tree attached.
    pub fn set_dependencies(self, dependencies: CacheDependency) -> Self {
        Self {
            dependencies: Some(dependencies),
            ..self
        }
    }

    /// The instant this item expires.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// The storage priority of this item.
    pub fn priority(&self) -> &CachePriority {
        &self.priority
    }

    /// The dependency tree attached to this item, if any.
    pub fn dependencies(&self) -> Option<&CacheDependency> {
        self.dependencies.as_ref()
    }

    /// Evaluates the state of this item at the given instant.
    ///
    /// An elapsed expiration makes the item `Invalid` outright; otherwise the state is
    /// the folded state of the dependency tree, and `Valid` when there is none.
    pub fn cache_state_at(&self, now: DateTime<Utc>) -> CacheValidationState {
        if now > self.expires_at {
            return CacheValidationState::Invalid;
        }
        match &self.dependencies {
            Some(deps) => deps.state_at(now),
            None => CacheValidationState::Valid,
        }
    }

    /// Evaluates the state of this item now.
    pub fn cache_state(&self) -> CacheValidationState {
        self.cache_state_at(Utc::now())
    }

    /// Whether the item may still be served.
    pub fn is_valid(&self) -> bool {
        self.cache_state().is_valid()
    }
}

impl fmt::Display for CachePolicyItem {
    /// The one-line serialized form: `"<microseconds since epoch>,<priority>[:<hint>]"`.
    ///
    /// Dependencies are runtime-only predicates and are deliberately not part of the
    /// serialized form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.expires_at.timestamp_micros(), self.priority)
    }
}

impl FromStr for CachePolicyItem {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (expires, priority) = s.split_once(',').ok_or_else(|| {
            CacheError::Validation(format!("malformed cache policy line `{s}`"))
        })?;

        let micros: i64 = expires.parse().map_err(|_| {
            CacheError::Validation(format!("malformed expiration timestamp `{expires}`"))
        })?;
        let expires_at = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
            CacheError::Validation(format!("expiration timestamp `{micros}` out of range"))
        })?;

        Ok(Self::new(expires_at).set_priority(priority.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn test_priority_round_trip() {
        let priority: CachePriority =
            CachePriority::with_hint(PriorityLevel::High, "pin-to-ram").unwrap();
        assert_eq!(priority.to_string(), "High:pin-to-ram");
        assert_eq!(priority.to_string().parse::<CachePriority>().unwrap(), priority);

        assert_eq!("Low".parse::<CachePriority>().unwrap(), CachePriority::low());
        assert!("Urgent".parse::<CachePriority>().is_err());
    }

    #[test]
    fn test_priority_hint_rejects_newline() {
        let result = CachePriority::with_hint(PriorityLevel::Default, "two\nlines");
        assert!(matches!(result, Err(CacheError::Validation(_))));
    }

    #[test]
    fn test_item_round_trip() {
        let expires_at = Utc::now() + TimeDelta::minutes(30);
        let item = CachePolicyItem::new(expires_at)
            .set_priority(CachePriority::high())
            .set_dependencies(CacheDependency::expires_at(expires_at));

        let parsed: CachePolicyItem = item.to_string().parse().unwrap();

        // expiration survives to the serialized (microsecond) precision
        assert_eq!(
            parsed.expires_at().timestamp_micros(),
            expires_at.timestamp_micros()
        );
        assert_eq!(parsed.priority(), item.priority());
        // dependencies are runtime-only and do not survive serialization
        assert_eq!(parsed.dependencies(), None);
    }

    #[test]
    fn test_item_state() {
        let now = Utc::now();

        let stale = CachePolicyItem::new(now - TimeDelta::seconds(1));
        assert_eq!(stale.cache_state_at(now), CacheValidationState::Invalid);
        assert!(!stale.is_valid());

        let fresh = CachePolicyItem::new(now + TimeDelta::hours(1));
        assert_eq!(fresh.cache_state_at(now), CacheValidationState::Valid);
        assert!(fresh.is_valid());

        // an invalid dependency poisons an otherwise fresh item
        let poisoned = CachePolicyItem::new(now + TimeDelta::hours(1))
            .set_dependencies(CacheDependency::expires_at(now - TimeDelta::hours(1)));
        assert_eq!(poisoned.cache_state_at(now), CacheValidationState::Invalid);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<CachePolicyItem>().is_err());
        assert!("123".parse::<CachePolicyItem>().is_err());
        assert!("abc,High".parse::<CachePolicyItem>().is_err());
        assert!("123,Urgent".parse::<CachePolicyItem>().is_err());
    }
}
