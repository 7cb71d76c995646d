/// Collapses a transport error message into a single bounded line.
///
/// Node responses often embed the raw request/response body or a backtrace;
/// both are elided so log lines stay readable.
pub fn compact_error_message(message: &str, max_len: usize) -> String {
    let mut raw = message;
    let mut elided_body = false;
    if let Some((prefix, _)) = raw.split_once(" text: ") {
        raw = prefix;
        elided_body = true;
    }
    if let Some((prefix, _)) = raw.split_once("Stack backtrace:") {
        raw = prefix;
    }

    let mut compact = String::with_capacity(raw.len().min(max_len.saturating_add(16)));
    let mut prev_ws = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !prev_ws && !compact.is_empty() {
                compact.push(' ');
            }
            prev_ws = true;
            continue;
        }
        compact.push(ch);
        prev_ws = false;
        if compact.len() > max_len {
            break;
        }
    }
    let compact = compact.trim_end().to_string();
    let mut compact = if compact.len() <= max_len {
        compact
    } else {
        let mut cut = max_len;
        while !compact.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...(truncated)", &compact[..cut])
    };
    if elided_body {
        compact.push_str(" text=<omitted>");
    }
    compact
}
