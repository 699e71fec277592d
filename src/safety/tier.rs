use serde::{Deserialize, Serialize};
use std::fmt;

/// Advice shown before a package is disabled or uninstalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyTier {
    Safe,
    #[default]
    Caution,
    Risky,
}

impl SafetyTier {
    /// Case-insensitive; anything unrecognized is `Caution`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "safe" => Self::Safe,
            "risky" => Self::Risky,
            _ => Self::Caution,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Caution => "caution",
            Self::Risky => "risky",
        }
    }
}

impl fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_parse() {
        assert_eq!(SafetyTier::parse_lenient("RISKY"), SafetyTier::Risky);
        assert_eq!(SafetyTier::parse_lenient(" Safe "), SafetyTier::Safe);
        assert_eq!(SafetyTier::parse_lenient("caution"), SafetyTier::Caution);
        assert_eq!(SafetyTier::parse_lenient("bogus"), SafetyTier::Caution);
        assert_eq!(SafetyTier::parse_lenient(""), SafetyTier::Caution);
    }
}
