//! Client-identity bypass strategies.
//!
//! Append-only table: the engine iterates whatever is here, so adding a row
//! never touches orchestration code.

use std::collections::BTreeMap;

/// Backend option key for extractor arguments (`--extractor-args`).
pub const EXTRACTOR_ARGS: &str = "extractor_args";

/// A client-identity profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub name: &'static str,
    pub description: &'static str,
    /// Extra backend options, opaque to the engine
    pub options: BTreeMap<&'static str, &'static str>,
}

impl Strategy {
    fn new(name: &'static str, description: &'static str, options: &[(&'static str, &'static str)]) -> Self {
        Self {
            name,
            description,
            options: options.iter().copied().collect(),
        }
    }
}

/// Ordered strategy catalog, preferred first.
pub fn list_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new("Standard", "Standard YouTube extraction", &[]),
        Strategy::new(
            "Android Bypass",
            "Uses Android player client",
            &[(EXTRACTOR_ARGS, "youtube:player_client=android")],
        ),
        Strategy::new(
            "iOS Bypass",
            "Uses iOS player client",
            &[(EXTRACTOR_ARGS, "youtube:player_client=ios")],
        ),
        Strategy::new(
            "TV Bypass",
            "Uses TV player client",
            &[(EXTRACTOR_ARGS, "youtube:player_client=tv")],
        ),
    ]
}

/// Case-insensitive lookup by name.
pub fn find_strategy(name: &str) -> Option<Strategy> {
    list_strategies()
        .into_iter()
        .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
}
