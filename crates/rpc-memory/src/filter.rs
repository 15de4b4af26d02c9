use pubsub_rpc::topic::{MULTI_LEVEL_WILDCARD, SEPARATOR, SINGLE_LEVEL_WILDCARD};

/// Whether `topic` matches the subscription `filter`.
///
/// `+` matches exactly one level, `#` matches the remaining levels including
/// none at all. Topics starting with `$` are not matched by a leading wildcard.
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$')
        && filter.starts_with([SINGLE_LEVEL_WILDCARD, MULTI_LEVEL_WILDCARD])
    {
        return false;
    }

    let mut topic_levels = topic.split(SEPARATOR);

    for level in filter.split(SEPARATOR) {
        if is_wildcard(level, MULTI_LEVEL_WILDCARD) {
            return true;
        }

        match topic_levels.next() {
            Some(topic_level) if is_wildcard(level, SINGLE_LEVEL_WILDCARD) || level == topic_level => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}

fn is_wildcard(level: &str, wildcard: char) -> bool {
    let mut chars = level.chars();
    chars.next() == Some(wildcard) && chars.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/c"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(matches("+/echo", "0f3a/echo"));
        assert!(matches("+/echo", "/echo"));
        assert!(!matches("+/echo", "0f3a/echo/response"));
        assert!(!matches("+/echo", "0f3a/other"));
        assert!(matches("a/+/c", "a/b/c"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(matches("#", "a/b/c"));
        assert!(matches("a/#", "a"));
        assert!(matches("a/#", "a/b/c"));
        assert!(!matches("a/#", "b/c"));
    }

    #[test]
    fn test_dollar_topics_hidden_from_leading_wildcards() {
        assert!(!matches("#", "$SYS/uptime"));
        assert!(!matches("+/uptime", "$SYS/uptime"));
        assert!(matches("$SYS/#", "$SYS/uptime"));
    }
}
