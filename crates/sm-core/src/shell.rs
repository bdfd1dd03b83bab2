//! Quoting for arguments embedded in remote shell commands

/// Quote `arg` so a POSIX shell passes it through as one literal word.
///
/// Wraps the argument in single quotes; embedded single quotes become `'\''`.
pub fn escape_argument(arg: &str) -> String {
    let mut escaped = String::with_capacity(arg.len() + 2);
    escaped.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(c);
        }
    }
    escaped.push('\'');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_argument() {
        assert_eq!(escape_argument("/tmp/agent"), "'/tmp/agent'");
    }

    #[test]
    fn test_argument_with_quotes_and_spaces() {
        assert_eq!(escape_argument("it's here"), "'it'\\''s here'");
    }

    #[test]
    fn test_metacharacters_stay_literal() {
        assert_eq!(escape_argument("$(rm -rf ~); `x`"), "'$(rm -rf ~); `x`'");
    }

    #[test]
    fn test_empty_argument() {
        assert_eq!(escape_argument(""), "''");
    }
}
