//! Named preset weight sets (§4.12 / §6 contract table). Weight tuples are
//! `(signal name, weight)`; a negative weight acts as a penalty.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Relevance,
    TechDebt,
    Hotspots,
    CodeReview,
    Onboarding,
    SecurityAudit,
    Refactoring,
    Ownership,
    ImpactAnalysis,
    Recent,
    Stable,
}

impl Preset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "relevance" => Some(Self::Relevance),
            "techDebt" => Some(Self::TechDebt),
            "hotspots" => Some(Self::Hotspots),
            "codeReview" => Some(Self::CodeReview),
            "onboarding" => Some(Self::Onboarding),
            "securityAudit" => Some(Self::SecurityAudit),
            "refactoring" => Some(Self::Refactoring),
            "ownership" => Some(Self::Ownership),
            "impactAnalysis" => Some(Self::ImpactAnalysis),
            "recent" => Some(Self::Recent),
            "stable" => Some(Self::Stable),
            _ => None,
        }
    }

    #[must_use]
    pub const fn weights(self) -> &'static [(&'static str, f64)] {
        match self {
            Self::Relevance => &[("similarity", 1.0)],
            Self::TechDebt => &[
                ("similarity", 0.25),
                ("age", 0.20),
                ("churn", 0.20),
                ("bugFix", 0.15),
                ("volatility", 0.20),
                ("blockPenalty", -0.15),
            ],
            Self::Hotspots => &[
                ("similarity", 0.25),
                ("chunkChurn", 0.15),
                ("chunkRelativeChurn", 0.15),
                ("burstActivity", 0.15),
                ("bugFix", 0.15),
                ("volatility", 0.15),
                ("blockPenalty", -0.15),
            ],
            Self::CodeReview => &[
                ("similarity", 0.35),
                ("recency", 0.15),
                ("burstActivity", 0.15),
                ("density", 0.15),
                ("chunkChurn", 0.20),
                ("blockPenalty", -0.10),
            ],
            Self::Onboarding => &[("similarity", 0.40), ("documentation", 0.30), ("stability", 0.30)],
            Self::SecurityAudit => &[
                ("similarity", 0.30),
                ("age", 0.15),
                ("ownership", 0.10),
                ("bugFix", 0.15),
                ("pathRisk", 0.15),
                ("volatility", 0.15),
            ],
            Self::Refactoring => &[
                ("similarity", 0.20),
                ("chunkChurn", 0.15),
                ("relativeChurnNorm", 0.15),
                ("chunkSize", 0.15),
                ("volatility", 0.15),
                ("bugFix", 0.10),
                ("age", 0.10),
                ("blockPenalty", -0.10),
            ],
            Self::Ownership => &[("similarity", 0.40), ("ownership", 0.35), ("knowledgeSilo", 0.25)],
            Self::ImpactAnalysis => &[("similarity", 0.50), ("imports", 0.50)],
            Self::Recent => &[("similarity", 0.70), ("recency", 0.30)],
            Self::Stable => &[("similarity", 0.70), ("stability", 0.30)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_roundtrips_every_preset() {
        for name in [
            "relevance",
            "techDebt",
            "hotspots",
            "codeReview",
            "onboarding",
            "securityAudit",
            "refactoring",
            "ownership",
            "impactAnalysis",
            "recent",
            "stable",
        ] {
            assert!(Preset::from_name(name).is_some(), "missing preset {name}");
        }
    }

    #[test]
    fn unknown_preset_name_is_none() {
        assert!(Preset::from_name("bogus").is_none());
    }
}
