use dwatch_core::{non_empty, SpeakerProfile};
use serde::Serialize;

use crate::config::ClassificationRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Witness, expert witness or public commenter.
    NonMemberRole,
    /// Neither a group nor a position was ever attached to the speaker.
    NoInstitutionalSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision", content = "reason")]
pub enum Classification {
    Register,
    Skip(SkipReason),
}

impl Classification {
    pub fn is_register(self) -> bool {
        matches!(self, Self::Register)
    }
}

/// Decides whether a speaker becomes a legislator row. Total and side-effect free.
pub fn classify(profile: &SpeakerProfile, rules: &ClassificationRules) -> Classification {
    if let Some(role) = non_empty(profile.role.as_deref()) {
        if rules.is_non_member_role(role) {
            return Classification::Skip(SkipReason::NonMemberRole);
        }
    }
    if non_empty(profile.group.as_deref()).is_none() && non_empty(profile.position.as_deref()).is_none() {
        return Classification::Skip(SkipReason::NoInstitutionalSignal);
    }
    Classification::Register
}

/// Government officeholders answering questions, judged by title keywords.
pub fn is_answerer(profile: &SpeakerProfile, rules: &ClassificationRules) -> bool {
    non_empty(profile.position.as_deref()).is_some_and(|p| rules.is_answerer_position(p))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn profile(role: Option<&str>, group: Option<&str>, position: Option<&str>) -> SpeakerProfile {
        let day = NaiveDate::from_ymd_opt(2024, 1, 26).unwrap();
        SpeakerProfile {
            name: "南野学".into(),
            yomi: None,
            group: group.map(Into::into),
            position: position.map(Into::into),
            house: None,
            role: role.map(Into::into),
            first_seen: day,
            last_seen: day,
        }
    }

    #[test]
    fn expert_witness_is_skipped_even_with_a_group() {
        let rules = ClassificationRules::default();
        let p = profile(Some("参考人"), Some("自由民主党"), Some("東都大学教授"));
        assert_eq!(classify(&p, &rules), Classification::Skip(SkipReason::NonMemberRole));
    }

    #[test]
    fn speaker_without_any_signal_is_skipped() {
        let rules = ClassificationRules::default();
        assert_eq!(
            classify(&profile(None, None, None), &rules),
            Classification::Skip(SkipReason::NoInstitutionalSignal)
        );
        assert_eq!(
            classify(&profile(None, Some(" "), Some("")), &rules),
            Classification::Skip(SkipReason::NoInstitutionalSignal)
        );
    }

    #[test]
    fn position_alone_registers() {
        let rules = ClassificationRules::default();
        assert!(classify(&profile(None, None, Some("内閣総理大臣")), &rules).is_register());
        assert!(classify(&profile(None, Some("立憲民主党・無所属"), None), &rules).is_register());
    }

    #[test]
    fn roles_outside_the_table_do_not_block_registration() {
        let rules = ClassificationRules::default();
        let p = profile(Some("政府特別補佐人"), None, Some("内閣法制局長官"));
        assert!(classify(&p, &rules).is_register());
    }

    #[test]
    fn answerers_are_detected_by_title() {
        let rules = ClassificationRules::default();
        assert!(is_answerer(&profile(None, None, Some("内閣官房長官")), &rules));
        assert!(is_answerer(&profile(Some("政府参考人"), None, Some("政府参考人")), &rules));
        assert!(!is_answerer(&profile(None, Some("日本共産党"), None), &rules));
    }
}
