//! Purchasable tiers and their catalogue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Unlock,
    Pro,
    Deep,
}

/// Static catalogue entry for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierInfo {
    pub name: &'static str,
    pub price_cents: u32,
    pub description: &'static str,
    pub features: &'static [&'static str],
}

impl Tier {
    /// Paid tiers offered by checkout, lowest first.
    pub const PAID: [Tier; 3] = [Tier::Unlock, Tier::Pro, Tier::Deep];

    /// Tiers offered by the wizard menu, in menu order (`1`, `2`, `3`).
    pub const WIZARD_MENU: [Tier; 3] = [Tier::Free, Tier::Pro, Tier::Deep];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Unlock => "unlock",
            Self::Pro => "pro",
            Self::Deep => "deep",
        }
    }

    /// Ordering used for upgrade checks: higher tiers see everything lower tiers see.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Unlock => 1,
            Self::Pro => 2,
            Self::Deep => 3,
        }
    }

    pub fn info(&self) -> TierInfo {
        match self {
            Self::Free => TierInfo {
                name: "Free Scan",
                price_cents: 0,
                description: "Quick scan with basic findings",
                features: &["Risk overview", "Finding titles and impact"],
            },
            Self::Unlock => TierInfo {
                name: "Unlock Report",
                price_cents: 3_900,
                description: "Full details for this scan",
                features: &[
                    "Technical analysis",
                    "Proof-of-concept code",
                    "Fix guidance",
                    "PDF export",
                ],
            },
            Self::Pro => TierInfo {
                name: "Pro Scan",
                price_cents: 25_000,
                description: "Unlock + new comprehensive scan",
                features: &[
                    "Everything in Unlock",
                    "300-iteration scan",
                    "More attack vectors",
                    "Detailed report",
                ],
            },
            Self::Deep => TierInfo {
                name: "Deep Analysis",
                price_cents: 89_900,
                description: "Unlock + thorough security audit",
                features: &[
                    "Everything in Pro",
                    "500-iteration deep scan",
                    "Full attack coverage",
                    "Executive summary",
                ],
            },
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Whether a successful purchase re-runs the scan as a linked child session.
    pub fn spawns_child(&self) -> bool {
        matches!(self, Self::Pro | Self::Deep)
    }

    /// Whether the already purchased tier covers this one.
    pub fn is_satisfied_by(&self, purchased: Option<Tier>) -> bool {
        let current = purchased.map_or(0, |t| t.rank());
        self.rank() <= current
    }

    /// Paid tiers still worth offering on top of `purchased`.
    pub fn upgrades_from(purchased: Option<Tier>) -> Vec<Tier> {
        Self::PAID
            .into_iter()
            .filter(|tier| !tier.is_satisfied_by(purchased))
            .collect()
    }

    /// Parse a wizard menu choice: numeric shorthand or exact name.
    pub fn from_menu_choice(input: &str) -> Option<Tier> {
        match input.trim().to_ascii_lowercase().as_str() {
            "1" | "free" => Some(Self::Free),
            "2" | "pro" => Some(Self::Pro),
            "3" | "deep" => Some(Self::Deep),
            _ => None,
        }
    }

    /// Price formatted in whole dollars, e.g. `$250`.
    pub fn price_label(&self) -> String {
        format!("${}", self.info().price_cents / 100)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a tier identifier is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tier: {0}")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "unlock" => Ok(Self::Unlock),
            "pro" => Ok(Self::Pro),
            "deep" => Ok(Self::Deep),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// A purchased tier as the gate sees it: `free` unlocks nothing.
pub fn paid_only(tier: Option<Tier>) -> Option<Tier> {
    tier.filter(Tier::is_paid)
}

/// Decode a wire `paid_tier`, treating `"free"` like `null`.
pub fn deserialize_paid_tier<'de, D>(deserializer: D) -> Result<Option<Tier>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(paid_only(Option::<Tier>::deserialize(deserializer)?))
}

/// Merge a newly observed purchased tier without ever downgrading.
pub fn max_tier(current: Option<Tier>, observed: Option<Tier>) -> Option<Tier> {
    match (paid_only(current), paid_only(observed)) {
        (Some(a), Some(b)) => Some(if b.rank() > a.rank() { b } else { a }),
        (a, None) => a,
        (None, b) => b,
    }
}
