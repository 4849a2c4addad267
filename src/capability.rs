//! Capability flag detection
//!
//! Reads the single environment variable that signals whether the optional
//! flash-attention path should be active on this node. Absence of the
//! variable is a valid "disabled" signal, not a fault, so there is no error
//! path here.

use std::env;

/// Default environment variable consulted by [`detect`].
pub const DEFAULT_FLAG_VAR: &str = "USE_FLASH_ATTENTION";

/// Tri-state capability signal sourced from the environment.
///
/// `Unset` behaves identically to `Disabled` everywhere: the fail-safe
/// default is "no optional extension".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityFlag {
    Enabled,
    Disabled,
    Unset,
}

impl CapabilityFlag {
    /// Parse a raw environment value. Only the exact literal token "TRUE"
    /// (case-insensitive) enables the feature; anything else, padding
    /// included, falls back to disabled.
    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("TRUE") => CapabilityFlag::Enabled,
            Some(_) => CapabilityFlag::Disabled,
            None => CapabilityFlag::Unset,
        }
    }

    /// Whether the acceleration extension should be present.
    pub fn is_enabled(self) -> bool {
        matches!(self, CapabilityFlag::Enabled)
    }
}

/// Read the capability flag from the named environment variable.
pub fn detect(var: &str) -> CapabilityFlag {
    CapabilityFlag::from_value(env::var(var).ok().as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn true_token_enables_regardless_of_case() {
        for v in ["TRUE", "true", "True", "tRuE"] {
            assert_eq!(CapabilityFlag::from_value(Some(v)), CapabilityFlag::Enabled);
        }
    }

    #[test]
    fn anything_else_disables() {
        for v in ["FALSE", "false", "1", "yes", "on", "", "truthy"] {
            let flag = CapabilityFlag::from_value(Some(v));
            assert_eq!(flag, CapabilityFlag::Disabled);
            assert!(!flag.is_enabled());
        }
    }

    #[test]
    fn padded_token_is_not_the_literal_and_disables() {
        for v in [" true ", "TRUE ", " TRUE", "\ttrue", "true\n"] {
            assert_eq!(CapabilityFlag::from_value(Some(v)), CapabilityFlag::Disabled);
        }
    }

    #[test]
    fn absent_is_unset_and_behaves_disabled() {
        let flag = CapabilityFlag::from_value(None);
        assert_eq!(flag, CapabilityFlag::Unset);
        assert!(!flag.is_enabled());
    }

    #[test]
    fn detect_reads_process_environment() {
        // Unique name to avoid clashing with parallel tests.
        let var = "HORDE_PROVISION_TEST_FLAG_7731";
        std::env::remove_var(var);
        assert_eq!(detect(var), CapabilityFlag::Unset);
        std::env::set_var(var, "true");
        assert_eq!(detect(var), CapabilityFlag::Enabled);
        std::env::set_var(var, "false");
        assert_eq!(detect(var), CapabilityFlag::Disabled);
        std::env::remove_var(var);
    }
}
