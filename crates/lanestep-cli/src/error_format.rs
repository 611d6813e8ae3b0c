//! Rendering of fatal errors.

/// Renders `err` and its causes one per line, each cause indented two
/// spaces deeper than the error it caused. Every line but the last ends
/// with `:`.
///
/// When a message repeats its cause at the end, the repeated part is
/// dropped.
pub fn formatted_error(err: &anyhow::Error) -> String {
    let messages: Vec<String> = err.chain().map(ToString::to_string).collect();

    let mut blocks = Vec::with_capacity(messages.len());
    for (level, message) in messages.iter().enumerate() {
        let mut reason = message.as_str();
        let next = messages.get(level + 1);
        if let Some(next) = next {
            reason = reason.strip_suffix(next.as_str()).unwrap_or(reason);
            reason = reason.trim_end_matches(' ');
            reason = reason.strip_suffix(':').unwrap_or(reason);
        }

        let mut block = indented(reason, level);
        if next.is_some() {
            block.push(':');
        }
        blocks.push(block);
    }
    blocks.join("\n")
}

fn indented(reason: &str, level: usize) -> String {
    let indent = "  ".repeat(level);
    reason
        .split('\n')
        .map(|line| line.trim_matches(' '))
        .filter(|line| !line.is_empty())
        .map(|line| format!("{indent}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[derive(Debug, thiserror::Error)]
    #[error("executing command failed (bundle install): {0}")]
    struct Wrapping(#[source] std::io::Error);

    #[test]
    fn test_single_error_is_unchanged() {
        let err = anyhow::anyhow!("no Lane parameter specified");
        assert_eq!(formatted_error(&err), "no Lane parameter specified");
    }

    #[test]
    fn test_causes_are_indented() {
        let err = Err::<(), _>(std::io::Error::other("permission denied"))
            .context("failed to read Gemfile.lock")
            .context("Failed to install Step dependencies")
            .unwrap_err();

        assert_eq!(
            formatted_error(&err),
            "Failed to install Step dependencies:\n  failed to read Gemfile.lock:\n    permission denied"
        );
    }

    #[test]
    fn test_repeated_cause_is_stripped() {
        let err = anyhow::Error::new(Wrapping(std::io::Error::other("not found")))
            .context("Failed to install Step dependencies");

        assert_eq!(
            formatted_error(&err),
            "Failed to install Step dependencies:\n  executing command failed (bundle install):\n    not found"
        );
    }

    #[test]
    fn test_multiline_messages_keep_their_indent() {
        let err = Err::<(), _>(anyhow::anyhow!("first line\n  second line\n"))
            .context("outer")
            .unwrap_err();

        assert_eq!(formatted_error(&err), "outer:\n  first line\n  second line");
    }
}
