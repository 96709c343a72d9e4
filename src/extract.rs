//! Lenient recovery of JSON objects from free-form model output.

/// Returns the body of the first markdown code fence, without the language tag.
pub(crate) fn extract_fenced_block(content: &str) -> Option<&str> {
    let start = content.find("```json").or_else(|| content.find("```"))?;
    let remainder = &content[start..];
    let after_language = remainder.find('\n')?;
    let body = &remainder[after_language + 1..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Removes every markdown fence marker, keeping the text between them.
pub(crate) fn strip_code_fences(content: &str) -> String {
    content.replace("```json", "").replace("```", "").trim().to_string()
}

// Quote/escape-aware scan: every complete top-level JSON object, in order
pub(crate) fn extract_json_objects(content: &str) -> Vec<&str> {
    let bytes = content.as_bytes();
    let mut objects = Vec::new();
    let mut start_pos = None;
    let mut depth: i32 = 0;

    let mut in_str = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_str {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_str = false;
            }
            continue;
        } else if b == b'"' && depth > 0 {
            in_str = true;
            continue;
        }

        match b {
            b'{' => {
                if depth == 0 {
                    start_pos = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start_pos.take() {
                            objects.push(&content[s..=i]);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    objects
}

/// Candidate JSON texts in the order they should be tried: the whole reply,
/// the fenced block, the fence-stripped reply, then embedded objects from
/// last to first.
pub(crate) fn json_candidates(content: &str) -> Vec<String> {
    let mut candidates = vec![content.trim().to_string()];

    if let Some(fenced) = extract_fenced_block(content) {
        candidates.push(fenced.to_string());
    }

    candidates.push(strip_code_fences(content));

    for object in extract_json_objects(content).into_iter().rev() {
        candidates.push(object.to_string());
    }

    candidates.dedup();
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_fenced_body() {
        let content = "Here you go:\n```json\n{\"score\": 7}\n```\nThanks";
        assert_eq!(extract_fenced_block(content), Some("{\"score\": 7}"));
    }

    #[test]
    fn scanner_handles_braces_in_strings() {
        let content = r#"noise {"name":"FindHotels","note":"brace {ok}"} trailing"#;
        let objects = extract_json_objects(content);
        assert_eq!(objects, vec![r#"{"name":"FindHotels","note":"brace {ok}"}"#]);
    }

    #[test]
    fn scanner_ignores_unterminated_objects() {
        let content = r#"{"name": "FindHotels", "arguments": {"location": "London""#;
        assert!(extract_json_objects(content).is_empty());
    }

    #[test]
    fn scanner_returns_every_top_level_object() {
        let content = r#"<functioncall> {"a": 1} </functioncall> and {"b": {"c": 2}}"#;
        assert_eq!(extract_json_objects(content), vec![r#"{"a": 1}"#, r#"{"b": {"c": 2}}"#]);
    }

    #[test]
    fn quotes_outside_objects_are_ignored() {
        let content = r#"Here's the "result": {"score": 3, "feedback": "ok"}"#;
        assert_eq!(
            extract_json_objects(content),
            vec![r#"{"score": 3, "feedback": "ok"}"#]
        );
    }

    #[test]
    fn candidates_prefer_whole_text_then_fence() {
        let content = "```json\n{\"score\": 1}\n```";
        let candidates = json_candidates(content);
        assert_eq!(candidates[0], content);
        assert_eq!(candidates[1], "{\"score\": 1}");
    }
}
