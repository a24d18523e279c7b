//! Persona memory: per-user profiles that shape answer style.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// The known persona variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersonaKind {
    Inspector,
    ClaimsAdjudicator,
    PolicyAnalyst,
    Administrator,
}

impl PersonaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaKind::Inspector => "inspector",
            PersonaKind::ClaimsAdjudicator => "claims_adjudicator",
            PersonaKind::PolicyAnalyst => "policy_analyst",
            PersonaKind::Administrator => "administrator",
        }
    }
}

impl std::str::FromStr for PersonaKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "inspector" => Ok(Self::Inspector),
            "claims_adjudicator" | "claimsadjudicator" => Ok(Self::ClaimsAdjudicator),
            "policy_analyst" | "policyanalyst" => Ok(Self::PolicyAnalyst),
            "administrator" => Ok(Self::Administrator),
            _ => Err(format!("unknown persona variant: {raw}")),
        }
    }
}

/// A user's persona profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonaMemory {
    pub user_id: String,
    pub kind: PersonaKind,
    /// role, response_style, preferred_sources, typical_questions.
    pub profile: FxHashMap<String, String>,
    pub preferences: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersonaMemory {
    /// Build the seeded default profile for a variant.
    pub fn seeded(user_id: impl Into<String>, kind: PersonaKind) -> Self {
        let (role, style, sources, questions, preferences): (_, _, _, _, &[&str]) = match kind {
            PersonaKind::Inspector => (
                "Workplace safety inspector",
                "precise and regulation-oriented",
                "inspection procedures, hazard classifications",
                "What are the citation criteria for scaffolding violations?",
                &["cite specific regulation numbers", "include inspection checklists"],
            ),
            PersonaKind::ClaimsAdjudicator => (
                "Workers' compensation claims adjudicator",
                "structured and evidence-focused",
                "claims procedures, medical documentation standards",
                "What documentation supports a repetitive strain claim?",
                &["summarize eligibility criteria first", "flag missing documentation"],
            ),
            PersonaKind::PolicyAnalyst => (
                "Occupational health policy analyst",
                "analytical with comparative context",
                "policy archives, regulatory impact analyses",
                "How did the lifting-limit guidance change across revisions?",
                &["include historical context", "link related policies"],
            ),
            PersonaKind::Administrator => (
                "Health and safety program administrator",
                "concise and action-oriented",
                "program manuals, training requirements",
                "Which teams are due for recertification this quarter?",
                &["lead with deadlines", "keep answers short"],
            ),
        };
        let mut profile = FxHashMap::default();
        profile.insert("role".to_string(), role.to_string());
        profile.insert("response_style".to_string(), style.to_string());
        profile.insert("preferred_sources".to_string(), sources.to_string());
        profile.insert("typical_questions".to_string(), questions.to_string());
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            kind,
            profile,
            preferences: preferences.iter().map(|s| s.to_string()).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The one-line persona description interpolated into prompts.
    pub fn prompt_line(&self) -> String {
        let role = self.profile.get("role").map(String::as_str).unwrap_or("user");
        let style = self
            .profile
            .get("response_style")
            .map(String::as_str)
            .unwrap_or("professional");
        format!("The reader is a {role}; respond in a {style} style.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_profiles_differ_by_variant() {
        let inspector = PersonaMemory::seeded("u1", PersonaKind::Inspector);
        let admin = PersonaMemory::seeded("u1", PersonaKind::Administrator);
        assert_ne!(inspector.profile["role"], admin.profile["role"]);
        assert!(inspector.prompt_line().contains("inspector"));
    }

    #[test]
    fn variant_parsing() {
        assert_eq!(
            "ClaimsAdjudicator".parse::<PersonaKind>().unwrap(),
            PersonaKind::ClaimsAdjudicator
        );
        assert!("welder".parse::<PersonaKind>().is_err());
    }
}
