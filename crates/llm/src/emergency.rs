//! Deterministic reply used when every candidate is unavailable.

/// `provider_used` for emergency replies
pub const EMERGENCY_PROVIDER: &str = "local:emergency";
pub const EMERGENCY_MODEL: &str = "emergency";

const EXCERPT_CHARS: usize = 500;
const EMPTY_PROMPT_PLACEHOLDER: &str = "(no transcript content was provided)";

/// Template text derived only from `prompt`; the same prompt always yields
/// the same text.
pub fn emergency_response(prompt: &str) -> String {
    let trimmed = prompt.trim();
    let excerpt = if trimmed.is_empty() {
        EMPTY_PROMPT_PLACEHOLDER.to_string()
    } else {
        excerpt(trimmed)
    };

    format!(
        "# Diary note (automatic fallback)\n\n\
         The language model services are temporarily unavailable, so this note \
         could not be generated automatically. The original input is preserved \
         below for manual review.\n\n\
         ## Input excerpt\n\n\
         {excerpt}\n\n\
         ## Next steps\n\n\
         - Review the excerpt above\n\
         - Regenerate this note once the services have recovered\n"
    )
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let prompt = "Patient reported feeling better today.";
        assert_eq!(emergency_response(prompt), emergency_response(prompt));
        assert!(emergency_response(prompt).contains(prompt));
    }

    #[test]
    fn test_empty_prompt_uses_placeholder() {
        assert!(emergency_response("   ").contains(EMPTY_PROMPT_PLACEHOLDER));
    }

    #[test]
    fn test_long_prompt_truncated_on_char_boundary() {
        let prompt = "é".repeat(EXCERPT_CHARS + 10);
        let text = emergency_response(&prompt);
        assert!(text.contains(&format!("{}...", "é".repeat(EXCERPT_CHARS))));
        assert!(!text.contains(&"é".repeat(EXCERPT_CHARS + 1)));
    }
}
