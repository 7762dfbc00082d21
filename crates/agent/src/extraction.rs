use chrono::NaiveDate;
use recoveries_core::ExtractionCandidate;

use crate::llm::{ChatMessage, Role};

/// Finds the first balanced `{...}` span in free-form text.
///
/// The extraction model is asked for bare JSON but routinely wraps it in
/// prose, so the span scan has to be string-aware: braces inside JSON
/// string literals (and escaped quotes inside those) must not count
/// toward nesting. An unbalanced candidate is skipped and the scan
/// resumes at the next opening brace.
pub fn first_json_object(text: &str) -> Option<&str> {
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(&text[start..]) {
            return Some(&text[start..start + end]);
        }
        search_from = start + 1;
    }

    None
}

fn balanced_end(candidate: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in candidate.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

/// Parses the extraction model's output into a candidate, tolerating
/// leading/trailing non-JSON text. `None` means the turn produced nothing
/// usable; the caller absorbs that.
pub fn parse_candidate(text: &str) -> Option<ExtractionCandidate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(candidate) = serde_json::from_str(trimmed) {
        return Some(candidate);
    }

    first_json_object(trimmed).and_then(|span| serde_json::from_str(span).ok())
}

/// Renders the conversation as the transcript the extraction prompt
/// expects: a dated header, then one `CUSTOMER:`/`AGENT:` line per turn.
/// System entries and blank turns are skipped.
pub fn render_transcript(conversation: &[ChatMessage], today: NaiveDate) -> String {
    let mut lines = vec![format!("Today: {}", today.format("%Y-%m-%d")), String::new(), "Transcript:".to_string()];

    for message in conversation {
        let content = message.content.trim();
        if content.is_empty() {
            continue;
        }
        match message.role {
            Role::User => lines.push(format!("CUSTOMER: {content}")),
            Role::Assistant => lines.push(format!("AGENT: {content}")),
            Role::System => {}
        }
    }

    lines.join("\n")
}
