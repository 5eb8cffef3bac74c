/// Strip `<system-reminder>...</system-reminder>` blocks injected into user turns.
pub fn strip_system_reminders(content: &str) -> String {
    const OPEN: &str = "<system-reminder>";
    const CLOSE: &str = "</system-reminder>";

    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find(OPEN) {
        result.push_str(&rest[..start]);
        match rest[start..].find(CLOSE) {
            Some(end) => rest = &rest[start + end + CLOSE.len()..],
            None => {
                // Unclosed tag: drop the remainder
                rest = "";
                break;
            }
        }
    }
    result.push_str(rest);
    result.trim().to_string()
}

/// True for harness-generated user turns that never reflect user intent:
/// slash-command wrappers, interrupts, mode banners, expanded skill bodies,
/// frontmatter and table-heavy documentation pastes.
pub fn is_system_meta_message(content: &str) -> bool {
    let trimmed = content.trim();
    let lower = trimmed.to_lowercase();

    if lower.starts_with("<local-command-")
        || lower.starts_with("<command-name>")
        || lower.starts_with("<command-message>")
        || lower.contains("[request interrupted by user")
        || lower.starts_with("this session is being continued")
        || lower.starts_with("caveat: the messages below")
    {
        return true;
    }

    // Expanded skill/command body
    if trimmed.starts_with("# ") && trimmed.len() > 500 {
        return true;
    }

    if trimmed.starts_with("---\n") && trimmed.contains("\n---\n") {
        return true;
    }

    let line_count = trimmed.lines().count();
    if line_count > 5 {
        let table_lines = trimmed
            .lines()
            .filter(|l| {
                let l = l.trim();
                l.starts_with('|') && l.ends_with('|')
            })
            .count();
        if table_lines as f64 / line_count as f64 > 0.5 {
            return true;
        }
    }

    false
}
