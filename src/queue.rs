use crate::transport::QueueDeclare;
use crate::{Arguments, Channel, Consumer, Result};

/// Options passed to the server when declaring a queue.
///
/// The [`default`](#impl-Default) implementation sets all boolean fields to false and has an
/// empty set of arguments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueDeclareOptions {
    /// If true, the queue is only accessible by this connection and is deleted when it closes.
    pub exclusive: bool,

    /// If true, the queue is deleted when its last consumer is cancelled.
    pub auto_delete: bool,

    /// If true, the queue survives server restarts.
    pub durable: bool,

    /// If true, only check that the queue exists; declaring a missing queue fails.
    pub passive: bool,

    /// Extra arguments; these are optional in general, but may be needed for some plugins or
    /// server-specific features.
    pub arguments: Arguments,
}

impl QueueDeclareOptions {
    pub(crate) fn into_declare(self, name: String) -> Result<QueueDeclare> {
        Ok(QueueDeclare {
            queue: name,
            passive: self.passive,
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            arguments: self.arguments.table()?,
        })
    }
}

/// Handle for a declared AMQP queue.
pub struct Queue<'a> {
    channel: &'a Channel,
    name: String,
    message_count: u32,
    consumer_count: u32,
}

impl Queue<'_> {
    pub(crate) fn new(
        channel: &Channel,
        name: String,
        message_count: u32,
        consumer_count: u32,
    ) -> Queue {
        Queue {
            channel,
            name,
            message_count,
            consumer_count,
        }
    }

    /// Name of the queue. For queues declared with an empty name this is the name the server
    /// generated.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of messages in the queue when it was declared.
    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    /// Number of consumers of the queue when it was declared.
    pub fn consumer_count(&self) -> u32 {
        self.consumer_count
    }

    /// Bind this queue to an exchange (an [`Exchange`](struct.Exchange.html) or its name) with
    /// the given binding key. Fanout exchanges ignore the key; topic exchanges treat it as a
    /// pattern.
    pub fn bind_to_exchange<E: AsRef<str>, S: Into<String>>(
        &self,
        exchange: E,
        binding_key: S,
    ) -> Result<()> {
        self.channel
            .queue_bind(self.name(), exchange.as_ref(), binding_key.into(), &Arguments::new())
    }

    /// Bind this queue to a headers exchange. `arguments` are the headers to match; include
    /// `x-match` (see [`Arguments::match_any`](struct.Arguments.html#method.match_any)) to
    /// choose how they combine. Without it, every header must match.
    pub fn bind_with_arguments<E: AsRef<str>>(&self, exchange: E, arguments: &Arguments) -> Result<()> {
        self.channel
            .queue_bind(self.name(), exchange.as_ref(), String::new(), arguments)
    }

    /// Start a consumer on this queue.
    pub fn consume(&self) -> Result<Consumer> {
        self.channel.consumer(self)
    }
}

impl AsRef<str> for Queue<'_> {
    fn as_ref(&self) -> &str {
        &self.name
    }
}
