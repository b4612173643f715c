// All LLM prompt constants for the Retrieval module.

/// HyDE expansion prompt. Replace `{query}` before sending.
pub const HYDE_PROMPT_TEMPLATE: &str = r#"Write the summary and skills sections of an ideal candidate profile for the job description below.

Rules:
- Plain text only: a 3-5 sentence professional summary, then a comma-separated skills list.
- Use the vocabulary a strong resume for this role would use.
- Do NOT include a name, email, phone number, address, links or any other contact details.
- Do NOT include work history, dates, company names or education.

Job description:
{query}"#;

/// Rerank prompt. Replace `{query}` and `{candidate}` before sending.
pub const RERANK_PROMPT_TEMPLATE: &str = r#"Rate how relevant the candidate profile is to the job description on a scale from 0 to 100, where 100 means a perfect match.

Respond with a single integer only. No words, no punctuation, no explanation.

Job description:
{query}

Candidate profile:
{candidate}"#;
