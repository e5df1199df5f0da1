//! Privilege tiers and command requirements

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Ordered privilege tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthLevel {
    #[default]
    #[serde(alias = "none")]
    None,
    #[serde(alias = "low")]
    Low,
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "high")]
    High,
}

impl AuthLevel {
    pub fn rank(&self) -> u8 {
        match self {
            AuthLevel::None => 0,
            AuthLevel::Low => 1,
            AuthLevel::Medium => 2,
            AuthLevel::High => 3,
        }
    }

    /// Whether this level is enough for `required`
    pub fn satisfies(&self, required: AuthLevel) -> bool {
        self.rank() >= required.rank()
    }
}

impl fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthLevel::None => "NONE",
            AuthLevel::Low => "LOW",
            AuthLevel::Medium => "MEDIUM",
            AuthLevel::High => "HIGH",
        };
        f.write_str(s)
    }
}

/// Verified factors of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Factors {
    pub face: bool,
    pub voice: bool,
    pub liveness: bool,
}

impl Factors {
    pub fn new(face: bool, voice: bool, liveness: bool) -> Self {
        Self {
            face,
            voice,
            liveness,
        }
    }

    /// Union of verified factors; never un-verifies
    pub fn merge(self, other: Factors) -> Factors {
        Factors {
            face: self.face || other.face,
            voice: self.voice || other.voice,
            liveness: self.liveness || other.liveness,
        }
    }
}

/// Rule mapping verified factors to a level.
///
/// Both rules give HIGH for all three factors and never let liveness alone
/// reach MEDIUM. They differ on whether a biometric without liveness does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelRule {
    /// MEDIUM when face or voice is verified
    #[default]
    AnyBiometric,
    /// MEDIUM only when face or voice is verified together with liveness
    LivenessBound,
}

impl LevelRule {
    pub fn level_for(&self, factors: Factors) -> AuthLevel {
        let biometric = factors.face || factors.voice;
        if factors.face && factors.voice && factors.liveness {
            return AuthLevel::High;
        }
        let medium = match self {
            LevelRule::AnyBiometric => biometric,
            LevelRule::LivenessBound => biometric && factors.liveness,
        };
        if medium {
            AuthLevel::Medium
        } else {
            AuthLevel::Low
        }
    }
}

/// Command name to required level. Unlisted commands require LOW.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    levels: HashMap<String, AuthLevel>,
}

impl CommandTable {
    pub fn new(levels: HashMap<String, AuthLevel>) -> Self {
        Self { levels }
    }

    pub fn required_level(&self, command: &str) -> AuthLevel {
        self.levels.get(command).copied().unwrap_or(AuthLevel::Low)
    }

    pub fn set(&mut self, command: impl Into<String>, level: AuthLevel) {
        self.levels.insert(command.into(), level);
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_level_ordering() {
        assert!(AuthLevel::None < AuthLevel::Low);
        assert!(AuthLevel::Low < AuthLevel::Medium);
        assert!(AuthLevel::Medium < AuthLevel::High);
        assert!(AuthLevel::High.satisfies(AuthLevel::Medium));
        assert!(!AuthLevel::Low.satisfies(AuthLevel::High));
    }

    #[test]
    fn test_level_serde() {
        assert_eq!(serde_json::to_string(&AuthLevel::Medium).unwrap(), "\"MEDIUM\"");
        let parsed: AuthLevel = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(parsed, AuthLevel::High);
    }

    #[test]
    fn test_any_biometric_rule() {
        let rule = LevelRule::AnyBiometric;
        assert_eq!(rule.level_for(Factors::new(true, true, true)), AuthLevel::High);
        assert_eq!(rule.level_for(Factors::new(true, false, true)), AuthLevel::Medium);
        assert_eq!(rule.level_for(Factors::new(false, true, false)), AuthLevel::Medium);
        assert_eq!(rule.level_for(Factors::new(false, false, true)), AuthLevel::Low);
        assert_eq!(rule.level_for(Factors::default()), AuthLevel::Low);
    }

    #[test]
    fn test_liveness_bound_rule() {
        let rule = LevelRule::LivenessBound;
        assert_eq!(rule.level_for(Factors::new(true, true, true)), AuthLevel::High);
        assert_eq!(rule.level_for(Factors::new(true, false, true)), AuthLevel::Medium);
        assert_eq!(rule.level_for(Factors::new(true, true, false)), AuthLevel::Low);
        assert_eq!(rule.level_for(Factors::new(false, false, true)), AuthLevel::Low);
    }

    #[test]
    fn test_merge_never_unverifies() {
        let merged = Factors::new(true, false, true).merge(Factors::new(false, true, false));
        assert_eq!(merged, Factors::new(true, true, true));
    }

    fn any_factors() -> impl Strategy<Value = Factors> {
        (any::<bool>(), any::<bool>(), any::<bool>())
            .prop_map(|(face, voice, liveness)| Factors::new(face, voice, liveness))
    }

    proptest! {
        #[test]
        fn prop_rules_monotonic_under_merge(a in any_factors(), b in any_factors()) {
            for rule in [LevelRule::AnyBiometric, LevelRule::LivenessBound] {
                prop_assert!(rule.level_for(a.merge(b)) >= rule.level_for(a));
            }
        }

        #[test]
        fn prop_liveness_bound_never_above_any_biometric(f in any_factors()) {
            prop_assert!(LevelRule::LivenessBound.level_for(f) <= LevelRule::AnyBiometric.level_for(f));
        }

        #[test]
        fn prop_liveness_alone_is_low(live in any::<bool>()) {
            let f = Factors::new(false, false, live);
            prop_assert_eq!(LevelRule::AnyBiometric.level_for(f), AuthLevel::Low);
            prop_assert_eq!(LevelRule::LivenessBound.level_for(f), AuthLevel::Low);
        }
    }

    #[test]
    fn test_command_table_default_low() {
        let mut table = CommandTable::default();
        table.set("unlock_door", AuthLevel::High);
        assert_eq!(table.required_level("unlock_door"), AuthLevel::High);
        assert_eq!(table.required_level("weather"), AuthLevel::Low);
    }
}
