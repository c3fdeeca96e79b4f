//! Summarization prompt templates.
//!
//! The output format is fixed: downstream readers look for these headers.

pub const SUMMARIZATION_SYSTEM_PROMPT: &str = "You are a context summarization assistant for a \
spreadsheet agent. Your task is to read a conversation between a user and an AI assistant \
working in a workbook, then produce a structured summary following the exact format specified.

Do NOT continue the conversation. Do NOT respond to any questions in the conversation. \
ONLY output the structured summary.";

/// Section headers every summary must carry, in order.
pub const REQUIRED_SECTIONS: &[&str] = &[
    "## Goal",
    "## Constraints & Preferences",
    "## Progress",
    "## Key Decisions",
    "## Next Steps",
    "## Critical Context",
];

const SUMMARY_FORMAT: &str = "## Goal
[What is the user trying to accomplish? Can be multiple items if the session covers different tasks.]

## Constraints & Preferences
- [Any constraints, preferences, or requirements mentioned by the user]
- [Or \"(none)\" if none were mentioned]

## Progress
### Done
- [x] [Completed tasks and changes, with sheet names and ranges]

### In Progress
- [ ] [Current work]

### Blocked
- [Issues preventing progress, if any]

## Key Decisions
- **[Decision]**: [Brief rationale]

## Next Steps
1. [Ordered list of what should happen next]

## Critical Context
- [Any data, formulas, ranges, or references needed to continue]
- [Or \"(none)\" if not applicable]

Keep each section concise. Preserve exact sheet names, cell ranges, formulas and error messages.";

const INITIAL_INSTRUCTIONS: &str = "The messages above are a conversation to summarize. \
Create a structured context checkpoint summary that another model will use to continue the work.

Use this EXACT format:";

const UPDATE_INSTRUCTIONS: &str = "The messages above are NEW conversation messages to \
incorporate into the existing summary provided in <previous-summary> tags.

Update the existing structured summary with new information. RULES:
- PRESERVE all existing information from the previous summary
- ADD new progress, decisions, and context from the new messages
- UPDATE the Progress section: move items from \"In Progress\" to \"Done\" when completed
- UPDATE \"Next Steps\" based on what was accomplished
- PRESERVE exact sheet names, ranges, and formulas
- If something is no longer relevant, you may remove it

Use this EXACT format:";

/// Compose the user prompt for one summarization call.
///
/// With a `previous_summary` the model is asked to update it rather than start
/// over. `focus` is appended verbatim when present.
pub fn build_summary_prompt(
    transcript: &str,
    previous_summary: Option<&str>,
    focus: Option<&str>,
) -> String {
    let mut prompt = format!("<conversation>\n{}\n</conversation>\n\n", transcript);

    match previous_summary {
        Some(previous) => {
            prompt.push_str(&format!(
                "<previous-summary>\n{}\n</previous-summary>\n\n",
                previous
            ));
            prompt.push_str(UPDATE_INSTRUCTIONS);
        }
        None => prompt.push_str(INITIAL_INSTRUCTIONS),
    }
    prompt.push_str("\n\n");
    prompt.push_str(SUMMARY_FORMAT);

    if let Some(focus) = focus.map(str::trim).filter(|f| !f.is_empty()) {
        prompt.push_str(&format!("\n\nAdditional focus: {}", focus));
    }
    prompt
}

/// Required headers absent from `summary`.
pub fn missing_sections(summary: &str) -> Vec<&'static str> {
    REQUIRED_SECTIONS
        .iter()
        .copied()
        .filter(|header| !summary.lines().any(|line| line.trim_end() == *header))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_prompt() {
        let prompt = build_summary_prompt("[User]: hi", None, None);
        assert!(prompt.starts_with("<conversation>\n[User]: hi\n</conversation>"));
        assert!(!prompt.contains("<previous-summary>"));
        assert!(prompt.contains("Create a structured context checkpoint"));
        for header in REQUIRED_SECTIONS {
            assert!(prompt.contains(header), "missing {}", header);
        }
        assert!(!prompt.contains("Additional focus"));
    }

    #[test]
    fn test_update_prompt_embeds_previous_summary() {
        let prompt = build_summary_prompt("[User]: more", Some("## Goal\nBudget model"), None);
        assert!(prompt.contains("<previous-summary>\n## Goal\nBudget model\n</previous-summary>"));
        assert!(prompt.contains("PRESERVE all existing information"));
        assert!(!prompt.contains("Create a structured context checkpoint"));
        let conversation = prompt.find("<conversation>").unwrap();
        let previous = prompt.find("<previous-summary>").unwrap();
        assert!(conversation < previous);
    }

    #[test]
    fn test_focus_is_appended() {
        let prompt = build_summary_prompt("t", None, Some("  pivot tables "));
        assert!(prompt.ends_with("Additional focus: pivot tables"));
        let blank = build_summary_prompt("t", None, Some("   "));
        assert!(!blank.contains("Additional focus"));
    }

    #[test]
    fn test_missing_sections() {
        assert_eq!(missing_sections(SUMMARY_FORMAT), Vec::<&str>::new());
        let partial = "## Goal\nx\n## Next Steps\n1. y";
        assert_eq!(
            missing_sections(partial),
            vec![
                "## Constraints & Preferences",
                "## Progress",
                "## Key Decisions",
                "## Critical Context"
            ]
        );
    }
}
