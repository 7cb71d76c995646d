use std::fs;
use std::path::Path;

/// Parses one `KEY=value` line of a `.env` file.
///
/// Blank lines, comments and lines without `=` yield `None`. Trailing `#`
/// comments are dropped and a single pair of matching quotes is stripped.
pub fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim().trim_start_matches("export ").trim();
    if key.is_empty() {
        return None;
    }

    let value_no_comment = value.split('#').next().unwrap_or("").trim();
    let parsed = if value_no_comment.len() >= 2
        && ((value_no_comment.starts_with('"') && value_no_comment.ends_with('"'))
            || (value_no_comment.starts_with('\'') && value_no_comment.ends_with('\'')))
    {
        &value_no_comment[1..value_no_comment.len() - 1]
    } else {
        value_no_comment
    };
    Some((key, parsed))
}

/// Loads `path` into the process environment without overriding variables
/// that are already set. Returns the number of variables applied.
pub fn load_dot_env(path: impl AsRef<Path>) -> usize {
    let path = path.as_ref();
    if !path.exists() {
        return 0;
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ENV] Failed to read {}: {}", path.display(), e);
            return 0;
        }
    };

    let mut applied = 0usize;
    for (key, value) in content.lines().filter_map(parse_env_line) {
        if std::env::var_os(key).is_some() {
            continue;
        }
        std::env::set_var(key, value);
        applied += 1;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_line_strips_quotes_and_comments() {
        assert_eq!(
            parse_env_line("INDEXER_RPC_URL=\"http://localhost:8545\" # local node"),
            Some(("INDEXER_RPC_URL", "http://localhost:8545"))
        );
        assert_eq!(
            parse_env_line("export INDEXER_DB_PATH='state.db'"),
            Some(("INDEXER_DB_PATH", "state.db"))
        );
    }

    #[test]
    fn test_parse_env_line_skips_noise() {
        assert_eq!(parse_env_line(""), None);
        assert_eq!(parse_env_line("   # comment"), None);
        assert_eq!(parse_env_line("NO_EQUALS_SIGN"), None);
        assert_eq!(parse_env_line("=value"), None);
    }
}
