//! API key handling.
//!
//! Keys are read from environment variables named in configuration, never
//! from the config file itself, and are wiped from memory on drop.

use std::fmt;
use zeroize::Zeroizing;

/// Placeholder key shipped by some providers for anonymous access.
const DEMO_KEY: &str = "demo";

/// Provider API key.
#[derive(Clone)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into().trim().to_string()))
    }

    /// Read a key from the named environment variable.
    ///
    /// Returns `None` when the variable is unset or empty.
    pub fn from_env(var_name: &str) -> Option<Self> {
        let value = std::env::var(var_name).ok()?;
        let credential = Self::new(value);
        if credential.0.is_empty() {
            None
        } else {
            Some(credential)
        }
    }

    /// The raw key, for building request parameters only. Never log it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// False for empty and demo keys.
    pub fn is_usable(&self) -> bool {
        !self.0.is_empty() && !self.0.eq_ignore_ascii_case(DEMO_KEY)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let c = Credential::new("super-secret");
        assert_eq!(format!("{c:?}"), "Credential(***)");
        assert_eq!(c.expose(), "super-secret");
    }

    #[test]
    fn test_demo_key_is_unusable() {
        assert!(!Credential::new("demo").is_usable());
        assert!(!Credential::new("DEMO").is_usable());
        assert!(!Credential::new("   ").is_usable());
        assert!(Credential::new("abc123").is_usable());
    }

    #[test]
    fn test_from_env_missing() {
        assert!(Credential::from_env("MDSYNC_TEST_SURELY_UNSET_VAR").is_none());
    }
}
