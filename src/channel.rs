use crate::errors::*;
use crate::session::Shared;
use crate::transport::{Consume, Publish, QueueBind};
use crate::{
    Arguments, Consumer, Exchange, ExchangeDeclareOptions, ExchangeType, Queue,
    QueueDeclareOptions, Result,
};
use log::{debug, trace, warn};
use snafu::OptionExt;
use std::sync::{Arc, Weak};

/// Handle for an AMQP channel.
///
/// Channels are numbered sub-streams of a [`Session`](struct.Session.html), which keeps owning
/// them; the handle only refers back to it. Dropping a `Channel` closes it and logs any error;
/// use [`close`](#method.close) to observe the error instead.
///
/// A server-side rejection of any operation closes the channel, as AMQP prescribes. Afterwards
/// [`is_open`](#method.is_open) is false and further operations fail with
/// [`ErrorKind::ChannelClosed`](enum.ErrorKind.html#variant.ChannelClosed).
pub struct Channel {
    session: Weak<Shared>,
    number: u16,
    released: bool,
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Err(err) = self.close_impl() {
            warn!("error closing channel {} on drop: {}", self.number, err);
        }
    }
}

impl Channel {
    pub(crate) fn new(session: Weak<Shared>, number: u16) -> Channel {
        Channel {
            session,
            number,
            released: false,
        }
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        self.session.upgrade().context(ClientClosedConnectionSnafu)
    }

    pub(crate) fn session(&self) -> &Weak<Shared> {
        &self.session
    }

    /// The channel number, unique within its session.
    pub fn number(&self) -> u16 {
        self.number
    }

    /// Whether the channel is still usable.
    pub fn is_open(&self) -> bool {
        match self.session.upgrade() {
            Some(shared) => shared.is_channel_open(self.number),
            None => false,
        }
    }

    /// Close this channel.
    pub fn close(mut self) -> Result<()> {
        self.close_impl()
    }

    fn close_impl(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        // Mark the number released even if the close fails; drop must not try again.
        self.released = true;
        let shared = match self.session.upgrade() {
            Some(shared) => shared,
            None => return Ok(()),
        };
        debug!("closing channel {}", self.number);
        shared.release_channel(self.number)
    }

    /// Declare a queue. An empty `name` asks the server to generate one, available from
    /// [`Queue::name`](struct.Queue.html#method.name).
    ///
    /// Declaring an existing queue with the same options succeeds; different options are
    /// rejected by the server.
    pub fn declare_queue<S: Into<String>>(&self, name: S, options: QueueDeclareOptions) -> Result<Queue> {
        let name = name.into();
        let declare = options.into_declare(name.clone())?;
        let number = self.number;
        let ok = self
            .shared()?
            .on_channel(number, |transport| transport.queue_declare(number, declare))
            .map_err(|err| {
                err.or_rejected(|code, text| Error::DeclareRejected {
                    name: name.clone(),
                    code,
                    text,
                })
            })?;
        debug!(
            "declared queue {} on channel {} (messages={}, consumers={})",
            ok.queue, number, ok.message_count, ok.consumer_count
        );
        Ok(Queue::new(self, ok.queue, ok.message_count, ok.consumer_count))
    }

    /// Declare an exchange of the given type. Redeclaring an existing exchange with a different
    /// type is rejected by the server. [`declare_direct_exchange`](#method.declare_direct_exchange)
    /// declares the default type.
    pub fn declare_exchange<S: Into<String>>(
        &self,
        name: S,
        type_: ExchangeType,
        options: ExchangeDeclareOptions,
    ) -> Result<Exchange> {
        let name = name.into();
        let declare = options.into_declare(name.clone(), type_)?;
        let number = self.number;
        self.shared()?
            .on_channel(number, |transport| transport.exchange_declare(number, declare))
            .map_err(|err| {
                err.or_rejected(|code, text| Error::DeclareRejected {
                    name: name.clone(),
                    code,
                    text,
                })
            })?;
        debug!(
            "declared {} exchange {} on channel {}",
            type_.as_ref(),
            name,
            number
        );
        Ok(Exchange::new(self, name, type_))
    }

    /// Declare a direct exchange, the type used when none is given.
    pub fn declare_direct_exchange<S: Into<String>>(
        &self,
        name: S,
        options: ExchangeDeclareOptions,
    ) -> Result<Exchange> {
        self.declare_exchange(name, ExchangeType::default(), options)
    }

    /// Publish a message to `exchange` with the given routing key. `content` may be a string
    /// or raw bytes; exactly its bytes are sent.
    ///
    /// AMQP publishes are not acknowledged, so over a network connection a rejection (e.g. a
    /// missing exchange) is reported by the next operation on this channel.
    pub fn publish<T: AsRef<[u8]>, E: Into<String>, S: Into<String>>(
        &self,
        content: T,
        exchange: E,
        routing_key: S,
    ) -> Result<()> {
        let publish = Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            ..Publish::default()
        };
        self.basic_publish(content.as_ref(), publish)
    }

    /// Publish a message to `exchange` carrying `headers` and an empty routing key, for headers
    /// exchanges.
    pub fn publish_with_headers<T: AsRef<[u8]>, E: Into<String>>(
        &self,
        content: T,
        exchange: E,
        headers: &Arguments,
    ) -> Result<()> {
        let publish = Publish {
            exchange: exchange.into(),
            headers: Some(headers.table()?),
            ..Publish::default()
        };
        self.basic_publish(content.as_ref(), publish)
    }

    fn basic_publish(&self, content: &[u8], publish: Publish) -> Result<()> {
        let exchange = publish.exchange.clone();
        let number = self.number;
        trace!(
            "publishing {} bytes to exchange {:?} (routing key {:?}) on channel {}",
            content.len(),
            exchange,
            publish.routing_key,
            number
        );
        self.shared()?
            .on_channel(number, |transport| {
                transport.basic_publish(number, publish, content)
            })
            .map_err(|err| {
                err.or_rejected(|code, text| Error::PublishRejected {
                    exchange,
                    code,
                    text,
                })
            })
    }

    pub(crate) fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: String,
        arguments: &Arguments,
    ) -> Result<()> {
        let bind = QueueBind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key,
            arguments: arguments.table()?,
        };
        let number = self.number;
        self.shared()?
            .on_channel(number, |transport| transport.queue_bind(number, bind))
            .map_err(|err| {
                err.or_rejected(|code, text| Error::BindRejected {
                    queue: queue.to_string(),
                    exchange: exchange.to_string(),
                    code,
                    text,
                })
            })?;
        debug!(
            "bound queue {} to exchange {} on channel {}",
            queue, exchange, number
        );
        Ok(())
    }

    /// Start consuming from a queue, given as a [`Queue`](struct.Queue.html) or its name.
    ///
    /// Messages are delivered without acknowledgement; the server considers a message handled
    /// once it is sent.
    pub fn consumer<Q: AsRef<str>>(&self, queue: Q) -> Result<Consumer> {
        let queue = queue.as_ref();
        let consume = Consume {
            queue: queue.to_string(),
            no_ack: true,
            ..Consume::default()
        };
        let number = self.number;
        let tag = self
            .shared()?
            .on_channel(number, |transport| transport.basic_consume(number, consume))
            .map_err(|err| {
                err.or_rejected(|code, text| Error::ConsumeRejected {
                    queue: queue.to_string(),
                    code,
                    text,
                })
            })?;
        debug!(
            "started consumer {} on queue {} (channel {})",
            tag, queue, number
        );
        Ok(Consumer::new(self, tag, queue.to_string()))
    }
}
