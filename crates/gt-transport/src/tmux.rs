//! tmux argument builders and output parsing.
//!
//! Both backends run the same tmux invocations; the local one spawns `tmux`
//! directly and the SSH one quotes the arguments into a remote command line.

/// `send-keys -t <session> -l -- <text>`: types the text without key-name
/// interpretation.
pub fn send_literal(session: &str, text: &str) -> Vec<String> {
    vec![
        "send-keys".to_string(),
        "-t".to_string(),
        session.to_string(),
        "-l".to_string(),
        "--".to_string(),
        text.to_string(),
    ]
}

/// `send-keys -t <session> Enter`
pub fn send_enter(session: &str) -> Vec<String> {
    vec![
        "send-keys".to_string(),
        "-t".to_string(),
        session.to_string(),
        "Enter".to_string(),
    ]
}

/// `capture-pane -p -t <session> -S -<lines>`
pub fn capture(session: &str, lines: usize) -> Vec<String> {
    vec![
        "capture-pane".to_string(),
        "-p".to_string(),
        "-t".to_string(),
        session.to_string(),
        "-S".to_string(),
        format!("-{}", lines),
    ]
}

/// `has-session -t =<session>` (exact name match).
pub fn has_session(session: &str) -> Vec<String> {
    vec![
        "has-session".to_string(),
        "-t".to_string(),
        format!("={}", session),
    ]
}

/// Split capture output into lines, drop the blank padding tmux adds below
/// the cursor, and keep the last `lines` entries.
pub fn parse_capture(output: &str, lines: usize) -> Vec<String> {
    let mut all: Vec<&str> = output.lines().collect();
    while all.last().is_some_and(|l| l.trim().is_empty()) {
        all.pop();
    }
    let start = all.len().saturating_sub(lines);
    all[start..].iter().map(|l| l.to_string()).collect()
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%' | ':' | '=' | '@' | ',')
    }) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Quote every argument and join them into one command line.
pub fn command_line(program: &str, args: &[String]) -> String {
    let mut line = shell_quote(program);
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line
}
