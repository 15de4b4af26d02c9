use crate::error::{Error, Result};

use uuid::Uuid;

/// Topic hierarchy separator.
pub const SEPARATOR: char = '/';

/// Single-level wildcard.
pub const SINGLE_LEVEL_WILDCARD: char = '+';

/// Multi-level wildcard.
pub const MULTI_LEVEL_WILDCARD: char = '#';

/// Appended to a request topic to form its response topic.
pub const RESPONSE_SUFFIX: &str = "/response";

const RESERVED: [char; 3] = [SEPARATOR, SINGLE_LEVEL_WILDCARD, MULTI_LEVEL_WILDCARD];

/// Request and response topic for a single call.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TopicPair {
    /// `<128-bit random hex>/<method>`.
    pub request_topic: String,

    /// Request topic followed by [`RESPONSE_SUFFIX`].
    pub response_topic: String,
}

/// Generates a fresh, unguessable topic pair per call.
///
/// Stateless apart from the reserved character set, so a single generator
/// can be shared by any number of concurrent callers.
#[derive(Clone, Debug, Default)]
pub struct TopicGenerator {
    extra_reserved: &'static [char],
}

impl TopicGenerator {
    /// A generator rejecting `/`, `+` and `#` in method names.
    #[must_use]
    pub const fn new() -> Self {
        Self { extra_reserved: &[] }
    }

    /// A generator that additionally rejects the given characters.
    #[must_use]
    pub const fn with_reserved(extra_reserved: &'static [char]) -> Self {
        Self { extra_reserved }
    }

    /// Creates the topic pair for one call to `method`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMethodName`] if the method name contains a
    /// separator, a wildcard or a transport-reserved character.
    pub fn create_topics(&self, method: &str) -> Result<TopicPair> {
        validate_name(method, self.extra_reserved)?;

        let request_topic = format!("{}{SEPARATOR}{method}", Uuid::new_v4().simple());
        let response_topic = format!("{request_topic}{RESPONSE_SUFFIX}");

        Ok(TopicPair {
            request_topic,
            response_topic,
        })
    }
}

/// Checks that a function or method name is usable as a single topic level.
///
/// # Errors
///
/// Returns [`Error::InvalidMethodName`] for empty names and names containing
/// reserved characters.
pub fn validate_name(name: &str, extra_reserved: &[char]) -> Result<()> {
    let reserved = || RESERVED.iter().chain(extra_reserved);

    if name.is_empty() || name.chars().any(|c| reserved().any(|r| *r == c)) {
        let listed = reserved()
            .map(|c| format!("{c:?}"))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::InvalidMethodName(name.to_string(), listed));
    }

    Ok(())
}

/// Filter matching every request topic for `function`.
#[must_use]
pub fn request_filter(function: &str) -> String {
    format!("{SINGLE_LEVEL_WILDCARD}{SEPARATOR}{function}")
}

/// Whether `topic` is a response topic rather than a request.
#[must_use]
pub fn is_response_topic(topic: &str) -> bool {
    topic.ends_with(RESPONSE_SUFFIX) && topic.split(SEPARATOR).count() > 2
}

/// The parts of a request topic the server cares about.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RequestTopic<'a> {
    /// Final level: the function name.
    pub function: &'a str,

    /// Second-to-last level, identifying the call. Diagnostic only.
    pub caller: Option<&'a str>,
}

/// Splits a request topic into function name and caller segment.
#[must_use]
pub fn parse_request_topic(topic: &str) -> Option<RequestTopic<'_>> {
    let mut levels = topic.rsplit(SEPARATOR);
    let function = levels.next().filter(|function| !function.is_empty())?;
    let caller = levels.next();

    Some(RequestTopic { function, caller })
}
