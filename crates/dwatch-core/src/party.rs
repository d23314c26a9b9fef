use serde::{Deserialize, Serialize};

pub const UNAFFILIATED_SHORT_NAME: &str = "無所属";

const FALLBACK_SHORT_NAME_CHARS: usize = 4;

/// Display category of a faction, used as a stable styling key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyCategory {
    Ldp,
    Cdp,
    Komeito,
    Ishin,
    Dpfp,
    Jcp,
    Reiwa,
    Other,
}

impl PartyCategory {
    pub fn css_class(self) -> &'static str {
        match self {
            Self::Ldp => "ldp",
            Self::Cdp => "cdp",
            Self::Komeito => "komeito",
            Self::Ishin => "ishin",
            Self::Dpfp => "dpfp",
            Self::Jcp => "jcp",
            Self::Reiwa => "reiwa",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyLabel {
    pub short_name: String,
    pub category: PartyCategory,
}

struct PartyRule {
    short_name: &'static str,
    category: PartyCategory,
    needles: &'static [&'static str],
}

// First match wins, so coalition names like 自由民主党・無所属の会 resolve to the lead party.
const PARTY_RULES: &[PartyRule] = &[
    PartyRule { short_name: "自民", category: PartyCategory::Ldp, needles: &["自由民主党", "自民"] },
    PartyRule { short_name: "立憲", category: PartyCategory::Cdp, needles: &["立憲民主", "立憲", "立民"] },
    PartyRule { short_name: "社民", category: PartyCategory::Cdp, needles: &["社会民主党", "社民"] },
    PartyRule { short_name: "公明", category: PartyCategory::Komeito, needles: &["公明"] },
    PartyRule { short_name: "維新", category: PartyCategory::Ishin, needles: &["維新"] },
    PartyRule { short_name: "国民", category: PartyCategory::Dpfp, needles: &["国民民主", "国民"] },
    PartyRule { short_name: "共産", category: PartyCategory::Jcp, needles: &["共産"] },
    PartyRule { short_name: "れいわ", category: PartyCategory::Reiwa, needles: &["れいわ"] },
    PartyRule { short_name: "参政", category: PartyCategory::Other, needles: &["参政"] },
    PartyRule { short_name: UNAFFILIATED_SHORT_NAME, category: PartyCategory::Other, needles: &[UNAFFILIATED_SHORT_NAME] },
];

/// Maps a faction name to its short display name and category.
///
/// Total: blank input is unaffiliated, and unknown names keep their first
/// four characters under [`PartyCategory::Other`]. Applying it to its own
/// output returns the same label.
pub fn normalize_party(name: Option<&str>) -> PartyLabel {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return PartyLabel {
            short_name: UNAFFILIATED_SHORT_NAME.to_string(),
            category: PartyCategory::Other,
        };
    };

    PARTY_RULES
        .iter()
        .find(|rule| rule.needles.iter().any(|needle| name.contains(needle)))
        .map(|rule| PartyLabel {
            short_name: rule.short_name.to_string(),
            category: rule.category,
        })
        .unwrap_or_else(|| PartyLabel {
            short_name: name.chars().take(FALLBACK_SHORT_NAME_CHARS).collect(),
            category: PartyCategory::Other,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_faction_names_map_to_short_labels() {
        let label = normalize_party(Some("自由民主党・無所属の会"));
        assert_eq!(label.short_name, "自民");
        assert_eq!(label.category, PartyCategory::Ldp);

        let label = normalize_party(Some("立憲民主党・無所属"));
        assert_eq!(label.short_name, "立憲");
        assert_eq!(label.category.css_class(), "cdp");

        assert_eq!(normalize_party(Some("日本維新の会")).category, PartyCategory::Ishin);
        assert_eq!(normalize_party(Some("日本共産党")).short_name, "共産");
    }

    #[test]
    fn normalization_is_idempotent() {
        for name in ["自由民主党", "公明党", "れいわ新選組", "国民民主党・無所属クラブ", "有志の会"] {
            let once = normalize_party(Some(name));
            let twice = normalize_party(Some(&once.short_name));
            assert_eq!(once, twice, "{name}");
        }
        assert_eq!(normalize_party(Some("自民")).short_name, "自民");
    }

    #[test]
    fn unknown_and_blank_names_fall_back() {
        let label = normalize_party(Some("教育無償化を実現する会"));
        assert_eq!(label.short_name, "教育無償");
        assert_eq!(label.category, PartyCategory::Other);

        let label = normalize_party(None);
        assert_eq!(label.short_name, UNAFFILIATED_SHORT_NAME);
        assert_eq!(normalize_party(Some(" ")).category, PartyCategory::Other);
    }
}
