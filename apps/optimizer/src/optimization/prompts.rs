// All LLM prompt constants for the Optimization module.

/// Reviewer prompt. Replace `{job_description}`, `{profile_json}`,
/// `{recent_exchanges}` and `{json_only}` before sending.
pub const REVIEW_PROMPT_TEMPLATE: &str = r#"You are reviewing a candidate profile against a job description.

Score how well the profile is tailored to the job on a scale from 0.0 to 1.0, and give concrete, actionable feedback on what to change next. Judge keyword coverage, relevance of highlighted experience, quantified impact and clarity of the summary.

Return a JSON object with this EXACT schema:
{"score": 0.0, "feedback": "..."}

{json_only}

Previous review rounds (oldest first, may be empty):
{recent_exchanges}

Job description:
{job_description}

Candidate profile (JSON):
{profile_json}"#;

/// Tailor prompt. Replace `{job_description}`, `{profile_json}`,
/// `{feedback}`, `{score}`, `{reference_templates}`, `{recent_exchanges}` and
/// `{json_only}` before sending.
pub const TAILOR_PROMPT_TEMPLATE: &str = r#"You are rewriting a candidate profile so it fits a job description better.

Apply the reviewer feedback. Rephrase, reorder and emphasize existing content; do NOT invent employers, titles, dates, degrees, metrics or skills the candidate does not have. Keep the JSON structure of the input profile exactly, including field names.

Return the complete revised profile as a JSON object.

{json_only}

Reviewer score: {score}
Reviewer feedback:
{feedback}

Reference profiles for similar roles (style guidance only, do not copy facts):
{reference_templates}

Previous rounds (oldest first, may be empty):
{recent_exchanges}

Job description:
{job_description}

Candidate profile (JSON):
{profile_json}"#;
