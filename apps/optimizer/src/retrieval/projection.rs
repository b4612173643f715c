//! Plain-text projection of a profile, used as the indexed document.
//!
//! Fixed section order: summary, skills, recent roles, projects, education.
//! Absent fields are omitted entirely; no placeholder text is emitted.

use crate::models::Profile;

/// Roles beyond this many (most recent first) are left out of the projection.
const MAX_ROLES: usize = 5;

pub fn project_profile(profile: &Profile) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(summary) = non_blank(profile.summary.as_deref()) {
        sections.push(format!("Summary:\n{summary}"));
    }

    let skills: Vec<String> = profile
        .skills
        .iter()
        .filter_map(|s| {
            let name = non_blank(Some(s.name.as_str()))?;
            Some(match non_blank(s.proficiency.as_deref()) {
                Some(level) => format!("{name} ({level})"),
                None => name.to_string(),
            })
        })
        .collect();
    if !skills.is_empty() {
        sections.push(format!("Skills:\n{}", skills.join(", ")));
    }

    let roles: Vec<String> = profile
        .recent_experiences()
        .into_iter()
        .take(MAX_ROLES)
        .filter_map(|e| {
            let title = non_blank(Some(e.title.as_str()));
            let company = non_blank(Some(e.company.as_str()));
            let heading = match (title, company) {
                (Some(title), Some(company)) => format!("{title} at {company}"),
                (Some(title), None) => title.to_string(),
                (None, Some(company)) => company.to_string(),
                (None, None) => return None,
            };
            let mut lines = vec![heading];
            if let Some(description) = non_blank(e.description.as_deref()) {
                lines.push(description.to_string());
            }
            lines.extend(
                e.highlights
                    .iter()
                    .filter_map(|h| non_blank(Some(h.as_str())))
                    .map(|h| format!("- {h}")),
            );
            Some(lines.join("\n"))
        })
        .collect();
    if !roles.is_empty() {
        sections.push(format!("Experience:\n{}", roles.join("\n\n")));
    }

    let projects: Vec<String> = profile
        .projects
        .iter()
        .filter_map(|p| {
            let name = non_blank(Some(p.name.as_str()))?;
            let mut line = name.to_string();
            if let Some(description) = non_blank(p.description.as_deref()) {
                line.push_str(": ");
                line.push_str(description);
            }
            let tech: Vec<&str> = p
                .technologies
                .iter()
                .filter_map(|t| non_blank(Some(t.as_str())))
                .collect();
            if !tech.is_empty() {
                line.push_str(&format!(" [{}]", tech.join(", ")));
            }
            Some(line)
        })
        .collect();
    if !projects.is_empty() {
        sections.push(format!("Projects:\n{}", projects.join("\n")));
    }

    let education: Vec<String> = profile
        .educations
        .iter()
        .filter_map(|e| {
            let institution = non_blank(Some(e.institution.as_str()))?;
            let qualification: Vec<&str> = [e.degree.as_deref(), e.field.as_deref()]
                .into_iter()
                .filter_map(non_blank)
                .collect();
            let mut line = if qualification.is_empty() {
                institution.to_string()
            } else {
                format!("{}, {institution}", qualification.join(" in "))
            };
            if let Some(year) = e.graduation_year {
                line.push_str(&format!(" ({year})"));
            }
            Some(line)
        })
        .collect();
    if !education.is_empty() {
        sections.push(format!("Education:\n{}", education.join("\n")));
    }

    sections.join("\n\n")
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
