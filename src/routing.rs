//! Exchange routing rules: which bindings a published message matches.
//!
//! These follow the AMQP 0-9-1 exchange types as RabbitMQ implements them. The client never
//! routes messages itself when talking to a real broker; the rules are used by
//! [`MemoryBroker`](transport/memory/struct.MemoryBroker.html) and are exposed so applications
//! can check what a binding will match.

use crate::field_table::{Arguments, X_MATCH};
use crate::ExchangeType;

/// How the headers of a headers-exchange binding are combined, from its `x-match` argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderMatch {
    /// Every binding header must be present with an equal value (the default).
    All,
    /// At least one binding header must be present with an equal value.
    Any,
    /// Like `All`, but `x-` prefixed headers take part in the comparison.
    AllWithX,
    /// Like `Any`, but `x-` prefixed headers take part in the comparison.
    AnyWithX,
}

impl HeaderMatch {
    /// Read the `x-match` argument. Returns `None` if it holds an unrecognized value.
    pub fn from_arguments(binding: &Arguments) -> Option<HeaderMatch> {
        match binding.get(X_MATCH) {
            None | Some("all") => Some(HeaderMatch::All),
            Some("any") => Some(HeaderMatch::Any),
            Some("all-with-x") => Some(HeaderMatch::AllWithX),
            Some("any-with-x") => Some(HeaderMatch::AnyWithX),
            Some(_) => None,
        }
    }

    fn compares_x_headers(self) -> bool {
        matches!(self, HeaderMatch::AllWithX | HeaderMatch::AnyWithX)
    }

    fn requires_all(self) -> bool {
        matches!(self, HeaderMatch::All | HeaderMatch::AllWithX)
    }
}

/// Does a message with `headers` match a headers-exchange binding with `binding` arguments?
///
/// A binding with an invalid `x-match` never matches.
pub fn headers_match(binding: &Arguments, headers: Option<&Arguments>) -> bool {
    let mode = match HeaderMatch::from_arguments(binding) {
        Some(mode) => mode,
        None => return false,
    };
    let mut compared = binding
        .iter()
        .filter(|(key, _)| *key != X_MATCH)
        .filter(|(key, _)| mode.compares_x_headers() || !key.starts_with("x-"));
    let matches = |(key, value): (&str, &str)| headers.and_then(|h| h.get(key)) == Some(value);

    if mode.requires_all() {
        compared.all(matches)
    } else {
        compared.any(matches)
    }
}

fn words(key: &str) -> Vec<&str> {
    if key.is_empty() {
        Vec::new()
    } else {
        key.split('.').collect()
    }
}

// matched[j]: the pattern words seen so far match the first j words of the key.
fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    let mut matched = vec![false; key.len() + 1];
    matched[0] = true;
    for &word in pattern {
        if word == "#" {
            for j in 1..=key.len() {
                matched[j] = matched[j] || matched[j - 1];
            }
        } else {
            for j in (1..=key.len()).rev() {
                matched[j] = matched[j - 1] && (word == "*" || key[j - 1] == word);
            }
            matched[0] = false;
        }
        if !matched.contains(&true) {
            return false;
        }
    }
    matched[key.len()]
}

/// Does `routing_key` match the topic binding `pattern`?
///
/// Both are split into `.`-separated words. In the pattern, `*` matches exactly one word and
/// `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    match_words(&words(pattern), &words(routing_key))
}

/// Does a message published with `routing_key` and `headers` match a binding of an exchange of
/// type `exchange_type`?
pub fn binding_matches(
    exchange_type: ExchangeType,
    binding_key: &str,
    binding_arguments: &Arguments,
    routing_key: &str,
    headers: Option<&Arguments>,
) -> bool {
    match exchange_type {
        ExchangeType::Direct => binding_key == routing_key,
        ExchangeType::Fanout => true,
        ExchangeType::Topic => topic_matches(binding_key, routing_key),
        ExchangeType::Headers => headers_match(binding_arguments, headers),
    }
}
