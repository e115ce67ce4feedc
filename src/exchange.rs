use crate::errors::*;
use crate::transport::ExchangeDeclare;
use crate::{Arguments, Channel, Result};
use std::str::FromStr;

/// Types of AMQP exchanges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeType {
    /// Routes a message to every queue bound with a binding key equal to its routing key.
    Direct,

    /// Routes a message to every bound queue, ignoring routing keys.
    Fanout,

    /// Routes by matching the routing key against `.`-separated binding patterns, where `*`
    /// stands for one word and `#` for zero or more.
    Topic,

    /// Routes by matching message headers against binding arguments. See
    /// [`Arguments::match_all`](struct.Arguments.html#method.match_all).
    Headers,
}

impl Default for ExchangeType {
    fn default() -> ExchangeType {
        ExchangeType::Direct
    }
}

impl AsRef<str> for ExchangeType {
    fn as_ref(&self) -> &str {
        use self::ExchangeType::*;
        match self {
            Direct => "direct",
            Fanout => "fanout",
            Topic => "topic",
            Headers => "headers",
        }
    }
}

impl FromStr for ExchangeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<ExchangeType> {
        use self::ExchangeType::*;
        match s {
            "direct" => Ok(Direct),
            "fanout" => Ok(Fanout),
            "topic" => Ok(Topic),
            "headers" => Ok(Headers),
            _ => UnknownExchangeTypeSnafu { type_: s }.fail(),
        }
    }
}

/// Options passed to the server when declaring an exchange.
///
/// The [`default`](#impl-Default) implementation sets all boolean fields to false and has an
/// empty set of arguments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeDeclareOptions {
    /// If true, only check that the exchange exists; declaring a missing exchange fails.
    pub passive: bool,

    /// If true, the exchange survives server restarts.
    pub durable: bool,

    /// If true, the server deletes the exchange once its last queue is unbound.
    pub auto_delete: bool,

    /// If true, the exchange cannot be published to directly.
    pub internal: bool,

    /// Extra arguments; these are optional in general, but may be needed for some plugins or
    /// server-specific features.
    pub arguments: Arguments,
}

impl ExchangeDeclareOptions {
    pub(crate) fn into_declare(self, name: String, type_: ExchangeType) -> Result<ExchangeDeclare> {
        Ok(ExchangeDeclare {
            exchange: name,
            type_: type_.as_ref().to_string(),
            passive: self.passive,
            durable: self.durable,
            auto_delete: self.auto_delete,
            internal: self.internal,
            arguments: self.arguments.table()?,
        })
    }
}

/// Handle for a declared AMQP exchange.
///
/// Exchanges borrow the [`Channel`](struct.Channel.html) they were declared on and publish
/// through it.
pub struct Exchange<'a> {
    channel: &'a Channel,
    name: String,
    type_: ExchangeType,
}

impl Exchange<'_> {
    pub(crate) fn new(channel: &Channel, name: String, type_: ExchangeType) -> Exchange {
        Exchange {
            channel,
            name,
            type_,
        }
    }

    /// Name of the exchange.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type this exchange was declared with.
    pub fn exchange_type(&self) -> ExchangeType {
        self.type_
    }

    /// Publish a message to this exchange with the given routing key.
    pub fn publish<T: AsRef<[u8]>, S: Into<String>>(&self, content: T, routing_key: S) -> Result<()> {
        self.channel.publish(content, self.name(), routing_key)
    }

    /// Publish a message carrying `headers`, for headers exchanges. The routing key is empty.
    pub fn publish_with_headers<T: AsRef<[u8]>>(&self, content: T, headers: &Arguments) -> Result<()> {
        self.channel.publish_with_headers(content, self.name(), headers)
    }
}

impl AsRef<str> for Exchange<'_> {
    fn as_ref(&self) -> &str {
        &self.name
    }
}
