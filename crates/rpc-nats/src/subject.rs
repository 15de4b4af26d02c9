use pubsub_rpc::topic::{MULTI_LEVEL_WILDCARD, SEPARATOR, SINGLE_LEVEL_WILDCARD};

const NATS_SEPARATOR: char = '.';
const NATS_SINGLE_LEVEL_WILDCARD: char = '*';
const NATS_MULTI_LEVEL_WILDCARD: char = '>';

/// Translates a topic or filter into a NATS subject.
pub fn to_subject(topic: &str) -> String {
    topic
        .chars()
        .map(|c| match c {
            SEPARATOR => NATS_SEPARATOR,
            SINGLE_LEVEL_WILDCARD => NATS_SINGLE_LEVEL_WILDCARD,
            MULTI_LEVEL_WILDCARD => NATS_MULTI_LEVEL_WILDCARD,
            other => other,
        })
        .collect()
}

/// Translates a NATS subject back into a topic.
pub fn from_subject(subject: &str) -> String {
    subject
        .chars()
        .map(|c| match c {
            NATS_SEPARATOR => SEPARATOR,
            NATS_SINGLE_LEVEL_WILDCARD => SINGLE_LEVEL_WILDCARD,
            NATS_MULTI_LEVEL_WILDCARD => MULTI_LEVEL_WILDCARD,
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_filter_maps_to_nats_wildcard() {
        assert_eq!(to_subject("+/echo"), "*.echo");
        assert_eq!(to_subject("a/#"), "a.>");
    }

    #[test]
    fn test_response_topic_round_trip() {
        let topic = "9f86d081884c7d659a2feaa0c55ad015/echo/response";

        assert_eq!(
            to_subject(topic),
            "9f86d081884c7d659a2feaa0c55ad015.echo.response"
        );
        assert_eq!(from_subject(&to_subject(topic)), topic);
    }
}
