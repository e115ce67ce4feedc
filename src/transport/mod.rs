//! The boundary between the session object model and whatever carries AMQP methods.
//!
//! A [`Transport`] performs one AMQP request per call and reports its outcome directly. Two
//! implementations ship with the crate: [`TcpTransport`](tcp/struct.TcpTransport.html), which
//! speaks AMQP 0-9-1 over a socket, and [`MemoryBroker`](memory/struct.MemoryBroker.html), an
//! in-process broker.

use crate::{Auth, Delivery, FieldTable, Result};
use std::time::Duration;

mod frame_buffer;
pub(crate) mod serialize;
pub mod memory;
pub mod tcp;

/// AMQP reply codes used when the server closes a channel or connection.
pub mod reply_code {
    pub const REPLY_SUCCESS: u16 = 200;
    pub const CONNECTION_FORCED: u16 = 320;
    pub const ACCESS_REFUSED: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const RESOURCE_LOCKED: u16 = 405;
    pub const PRECONDITION_FAILED: u16 = 406;
    pub const FRAME_ERROR: u16 = 501;
    pub const COMMAND_INVALID: u16 = 503;
    pub const CHANNEL_ERROR: u16 = 504;
    pub const NOT_ALLOWED: u16 = 530;
}

/// Arguments of `exchange.declare`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeDeclare {
    pub exchange: String,
    pub type_: String,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub arguments: FieldTable,
}

/// Arguments of `queue.declare`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueDeclare {
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: FieldTable,
}

/// Reply to `queue.declare`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueDeclareOk {
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Arguments of `queue.bind`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueBind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

/// Arguments of `basic.publish`, plus the `headers` content property.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Publish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub headers: Option<FieldTable>,
}

/// Arguments of `basic.consume`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Consume {
    pub queue: String,
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub arguments: FieldTable,
}

/// Request primitives the session layer needs from a connection.
///
/// Every method is a single synchronous round trip. A server-side rejection that closes the
/// channel is reported as [`Error::ServerClosedChannel`](../enum.Error.html#variant.ServerClosedChannel);
/// the transport forgets the channel afterwards.
pub trait Transport: Send {
    /// Authenticate and finish opening the connection.
    fn login(&mut self, auth: &Auth) -> Result<()>;

    /// Highest channel number usable on this connection, known after login.
    fn channel_max(&self) -> u16 {
        u16::max_value()
    }

    fn channel_open(&mut self, channel_id: u16) -> Result<()>;

    fn channel_close(&mut self, channel_id: u16) -> Result<()>;

    fn exchange_declare(&mut self, channel_id: u16, declare: ExchangeDeclare) -> Result<()>;

    fn queue_declare(&mut self, channel_id: u16, declare: QueueDeclare) -> Result<QueueDeclareOk>;

    fn queue_bind(&mut self, channel_id: u16, bind: QueueBind) -> Result<()>;

    fn basic_publish(&mut self, channel_id: u16, publish: Publish, content: &[u8]) -> Result<()>;

    /// Start a consumer; returns the server-assigned consumer tag.
    fn basic_consume(&mut self, channel_id: u16, consume: Consume) -> Result<String>;

    fn basic_cancel(&mut self, channel_id: u16, consumer_tag: &str) -> Result<()>;

    /// Wait up to `timeout` for the next delivery to the given consumer.
    fn wait_for_delivery(
        &mut self,
        channel_id: u16,
        consumer_tag: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>>;

    fn close(&mut self) -> Result<()>;
}
