//! Metric unit prefixes.

use std::fmt;

/// A unit prefix such as `K`, `M`, `G` or the binary `Ki`, `Mi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    /// No prefix.
    Base,
    Kilo,
    Mega,
    Giga,
    Tera,
    Peta,
    Exa,
    Zetta,
    Yotta,
    Milli,
    Micro,
    Nano,
    Kibi,
    Mebi,
    Gibi,
    Tebi,
    Pebi,
    Exbi,
    Zebi,
    Yobi,
}

const DECIMAL: [(i32, Prefix); 12] = [
    (-9, Prefix::Nano),
    (-6, Prefix::Micro),
    (-3, Prefix::Milli),
    (0, Prefix::Base),
    (3, Prefix::Kilo),
    (6, Prefix::Mega),
    (9, Prefix::Giga),
    (12, Prefix::Tera),
    (15, Prefix::Peta),
    (18, Prefix::Exa),
    (21, Prefix::Zetta),
    (24, Prefix::Yotta),
];

impl Prefix {
    /// Parse a prefix string.
    ///
    /// Accepts the same spellings as the monitoring stack emits: the empty
    /// string is the base prefix, `k`/`K` is kilo, `M` is mega and `m` is milli,
    /// binary prefixes carry a trailing `i`.
    pub fn parse(s: &str) -> Option<Self> {
        let prefix = match s {
            "" => Self::Base,
            "k" | "K" => Self::Kilo,
            "M" => Self::Mega,
            "g" | "G" => Self::Giga,
            "t" | "T" => Self::Tera,
            "p" | "P" => Self::Peta,
            "e" | "E" => Self::Exa,
            "z" | "Z" => Self::Zetta,
            "y" | "Y" => Self::Yotta,
            "m" => Self::Milli,
            "u" => Self::Micro,
            "n" => Self::Nano,
            "ki" | "Ki" => Self::Kibi,
            "Mi" => Self::Mebi,
            "gi" | "Gi" => Self::Gibi,
            "ti" | "Ti" => Self::Tebi,
            "pi" | "Pi" => Self::Pebi,
            "ei" | "Ei" => Self::Exbi,
            "zi" | "Zi" => Self::Zebi,
            "yi" | "Yi" => Self::Yobi,
            _ => return None,
        };
        Some(prefix)
    }

    /// Short form, e.g. `K` or `Gi`.
    pub fn short(&self) -> &'static str {
        match self {
            Self::Base => "",
            Self::Kilo => "K",
            Self::Mega => "M",
            Self::Giga => "G",
            Self::Tera => "T",
            Self::Peta => "P",
            Self::Exa => "E",
            Self::Zetta => "Z",
            Self::Yotta => "Y",
            Self::Milli => "m",
            Self::Micro => "u",
            Self::Nano => "n",
            Self::Kibi => "Ki",
            Self::Mebi => "Mi",
            Self::Gibi => "Gi",
            Self::Tebi => "Ti",
            Self::Pebi => "Pi",
            Self::Exbi => "Ei",
            Self::Zebi => "Zi",
            Self::Yobi => "Yi",
        }
    }

    /// Long form, e.g. `Kilo` or `Gibi`.
    pub fn long(&self) -> &'static str {
        match self {
            Self::Base => "",
            Self::Kilo => "Kilo",
            Self::Mega => "Mega",
            Self::Giga => "Giga",
            Self::Tera => "Tera",
            Self::Peta => "Peta",
            Self::Exa => "Exa",
            Self::Zetta => "Zetta",
            Self::Yotta => "Yotta",
            Self::Milli => "Milli",
            Self::Micro => "Micro",
            Self::Nano => "Nano",
            Self::Kibi => "Kibi",
            Self::Mebi => "Mebi",
            Self::Gibi => "Gibi",
            Self::Tebi => "Tebi",
            Self::Pebi => "Pebi",
            Self::Exbi => "Exbi",
            Self::Zebi => "Zebi",
            Self::Yobi => "Yobi",
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Self::Kibi
                | Self::Mebi
                | Self::Gibi
                | Self::Tebi
                | Self::Pebi
                | Self::Exbi
                | Self::Zebi
                | Self::Yobi
        )
    }

    /// Power-of-ten exponent of the prefix.
    ///
    /// Binary prefixes map onto the decimal step of the same rank
    /// (`Ki` -> 3, `Mi` -> 6, ...), so rescaling a binary unit lands on a
    /// decimal prefix.
    pub fn decimal_exponent(&self) -> i32 {
        match self {
            Self::Base => 0,
            Self::Kilo | Self::Kibi => 3,
            Self::Mega | Self::Mebi => 6,
            Self::Giga | Self::Gibi => 9,
            Self::Tera | Self::Tebi => 12,
            Self::Peta | Self::Pebi => 15,
            Self::Exa | Self::Exbi => 18,
            Self::Zetta | Self::Zebi => 21,
            Self::Yotta | Self::Yobi => 24,
            Self::Milli => -3,
            Self::Micro => -6,
            Self::Nano => -9,
        }
    }

    /// Decimal prefix for an exponent that is a multiple of three within
    /// `[-9, 24]`.
    pub fn from_decimal_exponent(exponent: i32) -> Option<Self> {
        DECIMAL
            .iter()
            .find(|(e, _)| *e == exponent)
            .map(|(_, p)| *p)
    }

    /// Multiplicative value of the prefix.
    pub fn factor(&self) -> f64 {
        if self.is_binary() {
            let rank = self.decimal_exponent() / 3;
            1024f64.powi(rank)
        } else {
            crate::pow10(self.decimal_exponent())
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}
