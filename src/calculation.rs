//! Calculation types and parameters
//!
//! The calculation type decides which artifacts a job produces (see [crate::manifest]). Types
//! arrive as free text from requests and the database, so anything outside the known set is kept
//! verbatim as [CalculationType::Unrecognized] and still flows through every exhaustive match.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CalculationType {
    Energy,
    Optimization,
    Frequency,
    Orbitals,
    Transition,
    Irc,
    /// Optimization, frequencies and orbitals in one job
    Standard,
    Unrecognized(String),
}

impl CalculationType {
    pub const KNOWN: [CalculationType; 7] = [
        CalculationType::Energy,
        CalculationType::Optimization,
        CalculationType::Frequency,
        CalculationType::Orbitals,
        CalculationType::Transition,
        CalculationType::Irc,
        CalculationType::Standard,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            CalculationType::Energy => "energy",
            CalculationType::Optimization => "optimization",
            CalculationType::Frequency => "frequency",
            CalculationType::Orbitals => "orbitals",
            CalculationType::Transition => "transition",
            CalculationType::Irc => "irc",
            CalculationType::Standard => "standard",
            CalculationType::Unrecognized(raw) => raw,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, CalculationType::Unrecognized(_))
    }
}

impl From<&str> for CalculationType {
    fn from(s: &str) -> Self {
        match s {
            "energy" => CalculationType::Energy,
            "optimization" => CalculationType::Optimization,
            "frequency" => CalculationType::Frequency,
            "orbitals" => CalculationType::Orbitals,
            "transition" => CalculationType::Transition,
            "irc" => CalculationType::Irc,
            "standard" => CalculationType::Standard,
            other => CalculationType::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for CalculationType {
    fn from(s: String) -> Self {
        CalculationType::from(s.as_str())
    }
}

impl From<CalculationType> for String {
    fn from(calculation_type: CalculationType) -> Self {
        calculation_type.as_str().to_string()
    }
}

impl fmt::Display for CalculationType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters of a calculation, fixed once the job is submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calculation {
    pub calculation_type: CalculationType,
    pub method: String,
    pub basis_set: String,
    pub charge: i32,
    pub multiplicity: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types_round_trip_through_strings() {
        for calculation_type in CalculationType::KNOWN {
            let text = calculation_type.to_string();
            assert_eq!(CalculationType::from(text.as_str()), calculation_type);
            assert!(calculation_type.is_recognized());
        }
    }

    #[test]
    fn test_unknown_type_is_kept_verbatim() {
        let geometry = CalculationType::from("geometry");
        assert_eq!(geometry, CalculationType::Unrecognized("geometry".to_string()));
        assert_eq!(geometry.as_str(), "geometry");
        assert!(!geometry.is_recognized());
    }

    #[test]
    fn test_serde_uses_plain_strings() {
        let json = serde_json::to_string(&CalculationType::Irc).unwrap();
        assert_eq!(json, "\"irc\"");
        let parsed: CalculationType = serde_json::from_str("\"Frequency\"").unwrap();
        assert_eq!(parsed, CalculationType::Unrecognized("Frequency".to_string()));
    }
}
