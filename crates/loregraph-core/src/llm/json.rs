//! Pulling JSON payloads out of model responses

/// Extract JSON from a response that might contain markdown or prose
///
/// Tries a ```` ```json ```` fence, then any fence, then the outermost
/// `{...}` span. Falls back to the trimmed input.
pub fn extract_json_from_response(response: &str) -> &str {
    if let Some(start) = response.find("```json") {
        let json_start = start + "```json".len();
        if let Some(end) = response[json_start..].find("```") {
            return response[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = response.find("```") {
        let fence_end = start + 3;
        if let Some(newline) = response[fence_end..].find('\n') {
            let json_start = fence_end + newline + 1;
            if let Some(end) = response[json_start..].find("```") {
                return response[json_start..json_start + end].trim();
            }
        }
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}'))
        && start < end
    {
        return &response[start..=end];
    }

    response.trim()
}

/// Truncate text to at most `max_chars` characters, marking the cut
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}...", &text[..cut]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_fence() {
        let response = "Here's the analysis:\n```json\n{\"entities\": []}\n```";
        assert_eq!(extract_json_from_response(response), "{\"entities\": []}");
    }

    #[test]
    fn test_generic_fence() {
        let response = "```\n{\"text\": \"hi\"}\n```\nDone.";
        assert_eq!(extract_json_from_response(response), "{\"text\": \"hi\"}");
    }

    #[test]
    fn test_raw_object_in_prose() {
        let response = "The result is {\"entities\": [{\"name\": \"x\"}]} as shown.";
        assert_eq!(
            extract_json_from_response(response),
            "{\"entities\": [{\"name\": \"x\"}]}"
        );
    }

    #[test]
    fn test_no_json() {
        assert_eq!(extract_json_from_response("  nothing here "), "nothing here");
        assert_eq!(extract_json_from_response("} backwards {"), "} backwards {");
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("ééééé", 2), "éé...");
    }
}
