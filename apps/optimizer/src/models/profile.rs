use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A structured candidate profile. Contact data is deliberately not modelled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub id: Option<Uuid>,
    pub full_name: Option<String>,
    pub headline: Option<String>,
    pub summary: Option<String>,
    pub skills: Vec<Skill>,
    pub experiences: Vec<Experience>,
    pub projects: Vec<Project>,
    pub educations: Vec<Education>,
    /// Append-only audit trail, one record per optimization iteration.
    pub optimization_history: Vec<OptimizationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub proficiency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experience {
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// `None` means current role.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Education {
    pub institution: String,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub graduation_year: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationRecord {
    pub feedback: String,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

impl OptimizationRecord {
    pub fn now(feedback: impl Into<String>, score: f64) -> Self {
        Self {
            feedback: feedback.into(),
            score,
            timestamp: Utc::now(),
        }
    }
}

impl Profile {
    /// Experiences ordered most recent first: current roles, then by end date,
    /// then by start date. Undated roles keep their relative order at the end.
    pub fn recent_experiences(&self) -> Vec<&Experience> {
        let mut experiences: Vec<&Experience> = self.experiences.iter().collect();
        experiences.sort_by(|a, b| recency_key(b).cmp(&recency_key(a)));
        experiences
    }
}

fn recency_key(e: &Experience) -> (u8, Option<NaiveDate>, Option<NaiveDate>) {
    match (e.start_date, e.end_date) {
        (None, None) => (0, None, None),
        (start, None) => (2, None, start),
        (start, Some(end)) => (1, Some(end), start),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experience(title: &str, start: Option<(i32, u32)>, end: Option<(i32, u32)>) -> Experience {
        let date = |(y, m): (i32, u32)| NaiveDate::from_ymd_opt(y, m, 1).unwrap();
        Experience {
            title: title.to_string(),
            company: "Acme".to_string(),
            start_date: start.map(date),
            end_date: end.map(date),
            description: None,
            highlights: vec![],
        }
    }

    #[test]
    fn test_profile_deserializes_with_missing_fields() {
        let profile: Profile = serde_json::from_str(r#"{"summary": "Rust engineer"}"#).unwrap();
        assert_eq!(profile.summary.as_deref(), Some("Rust engineer"));
        assert!(profile.skills.is_empty());
        assert!(profile.optimization_history.is_empty());
    }

    #[test]
    fn test_recent_experiences_puts_current_role_first() {
        let profile = Profile {
            experiences: vec![
                experience("Old", Some((2015, 1)), Some((2018, 6))),
                experience("Undated", None, None),
                experience("Current", Some((2021, 3)), None),
                experience("Middle", Some((2018, 7)), Some((2021, 2))),
            ],
            ..Profile::default()
        };

        let titles: Vec<&str> = profile
            .recent_experiences()
            .iter()
            .map(|e| e.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Current", "Middle", "Old", "Undated"]);
    }
}
