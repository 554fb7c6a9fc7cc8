//! Pulling an agent's reply out of a captured pane.

const SPINNER_GLYPHS: [char; 6] = ['✻', '✽', '✶', '✳', '✢', '·'];

/// The reply to `sent` within `lines`: everything after the first line that
/// echoes the message, or failing that everything past the baseline, or
/// failing that the whole capture.
pub fn extract_response(lines: &[String], baseline_len: usize, sent: &str) -> String {
    match lines.iter().position(|l| l.contains(sent)) {
        Some(i) => clean_response_lines(&lines[i + 1..]),
        None if lines.len() > baseline_len => clean_response_lines(&lines[baseline_len..]),
        None => clean_response_lines(lines),
    }
}

/// Drop leading blanks, UI chrome and trailing blanks; join the rest.
pub fn clean_response_lines(lines: &[String]) -> String {
    let mut cleaned: Vec<&str> = Vec::new();
    for line in lines {
        let trimmed = line.trim();
        if cleaned.is_empty() && trimmed.is_empty() {
            continue;
        }
        if is_ui_artifact(trimmed) {
            continue;
        }
        cleaned.push(line);
    }
    while cleaned.last().is_some_and(|l| l.trim().is_empty()) {
        cleaned.pop();
    }
    cleaned.join("\n")
}

/// Whether a trimmed line is terminal chrome rather than reply text.
pub fn is_ui_artifact(line: &str) -> bool {
    // Horizontal rules.
    if line.starts_with('─') && line.chars().all(|c| c == '─' || c == ' ') {
        return true;
    }
    // Input prompt.
    if line == "❯" || line.starts_with("❯ ") {
        return true;
    }
    if line.contains("bypass permissions") || line.starts_with("⏵⏵") {
        return true;
    }
    // Working spinner, e.g. "✻ Thinking…".
    let mut chars = line.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(g), None | Some(' ')) if SPINNER_GLYPHS.contains(&g)
    )
}
