use std::time::Duration;

use serde::{Deserialize, Serialize};

/// User-facing knobs for assembling a [`CacheService`](crate::service::CacheService).
///
/// This crate performs no configuration-file loading of its own; embedders
/// deserialize this from whatever source they already have.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheServiceConfig {
    /// Time-to-live applied when an operation supplies no explicit policy, parsed from
    /// a humantime string such as `"15min"` or `"2h 30m"`.
    ///
    /// Leaving this unset means every fill must bring its own policy.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttl_parses_humantime() {
        let config: CacheServiceConfig = serde_json::from_str(r#"{"default_ttl": "15min"}"#).unwrap();
        assert_eq!(config.default_ttl, Some(Duration::from_secs(15 * 60)));

        let config: CacheServiceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.default_ttl, None);
    }
}
