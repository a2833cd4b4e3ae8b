//! Units composed of a prefix and a base measure.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::Prefix;

static PREFIX_UNIT_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([kKmMgGtTpPeEzZyYun]?i?)(.*)$").expect("prefix split regex is valid")
});

/// A metric unit like `GB/s` split into its prefix and base (`B/s`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Unit {
    pub prefix: Prefix,
    pub base: String,
}

impl Unit {
    pub fn new(prefix: Prefix, base: impl Into<String>) -> Self {
        Self {
            prefix,
            base: base.into(),
        }
    }

    /// Split a unit string into prefix and base.
    ///
    /// A leading character that is not a known prefix stays part of the base,
    /// so `iops` parses as base `iops` without a prefix.
    pub fn parse(s: &str) -> Self {
        if let Some(caps) = PREFIX_UNIT_SPLIT.captures(s) {
            let head = caps.get(1).map_or("", |m| m.as_str());
            let rest = caps.get(2).map_or("", |m| m.as_str());
            if !rest.is_empty()
                && let Some(prefix) = Prefix::parse(head)
            {
                return Self::new(prefix, rest);
            }
        }
        Self::new(Prefix::Base, s)
    }

    /// Only byte quantities, byte rates and flop rates are rescaled.
    pub fn is_normalizable(&self) -> bool {
        self.base.contains("B/s") || self.base.contains("F/s") || self.base.contains('B')
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix.short(), self.base)
    }
}
