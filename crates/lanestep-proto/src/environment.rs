//! Read access to environment variables.
//!
//! The CI platform configures the step and hands data to fastlane through
//! environment variables. Code that needs them takes an `&dyn Environment`
//! instead of calling `std::env` directly, so tests can supply a map.

use std::collections::HashMap;

/// Source of environment variables.
pub trait Environment: Send + Sync {
    /// Returns the value of `key`, if set.
    fn get(&self, key: &str) -> Option<String>;

    /// Returns the value of `key` when it is set and not blank.
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|value| !value.trim().is_empty())
    }

    /// Returns true when `key` is set, even to an empty value.
    fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// The current process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// A fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }
}

impl Environment for MapEnvironment {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

impl<K, V> FromIterator<(K, V)> for MapEnvironment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_environment_lookup() {
        let env = MapEnvironment::new()
            .with("BITRISE_BUILD_URL", "https://app.bitrise.io/build/1")
            .with("EMPTY", "  ");

        assert_eq!(
            env.get("BITRISE_BUILD_URL").as_deref(),
            Some("https://app.bitrise.io/build/1")
        );
        assert!(env.is_set("EMPTY"));
        assert_eq!(env.get_non_empty("EMPTY"), None);
        assert_eq!(env.get("MISSING"), None);
    }

    #[test]
    fn test_map_environment_from_iter() {
        let env: MapEnvironment = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(env.get("B").as_deref(), Some("2"));
    }
}
