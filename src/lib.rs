//! An AMQP 0-9-1 client built around a small object model: a [`Session`] hands out numbered
//! [`Channel`]s, channels declare [`Exchange`]s and [`Queue`]s, queues are bound to exchanges
//! and consumed through a [`Consumer`].
//!
//! Every operation returns a [`Result`]; the session also remembers the outcome of the most
//! recent operation ([`Session::last_operation_succeeded`]).
//!
//! ```rust
//! use warren::transport::memory::MemoryBroker;
//! use warren::{Arguments, ExchangeType, QueueDeclareOptions, Session};
//! use std::time::Duration;
//!
//! # fn main() -> warren::Result<()> {
//! let broker = MemoryBroker::new();
//! let session = Session::with_transport(broker.connect());
//! session.login("guest", "guest")?;
//! let channel = session.open_channel()?;
//!
//! let exchange = channel.declare_exchange("reports", ExchangeType::Headers, Default::default())?;
//! let queue = channel.declare_queue("", QueueDeclareOptions::default())?;
//! queue.bind_with_arguments(&exchange, &Arguments::new().with("format", "pdf").match_all())?;
//! let consumer = queue.consume()?;
//!
//! exchange.publish_with_headers("report", &Arguments::new().with("format", "pdf"))?;
//! let delivery = consumer.pop_timeout(Duration::from_secs(1))?.unwrap();
//! assert_eq!(delivery.content(), b"report");
//! # Ok(())
//! # }
//! ```

mod auth;
mod channel;
mod channel_slots;
mod connection_options;
mod consumer;
mod delivery;
mod errors;
mod exchange;
mod field_table;
mod heartbeats;
mod queue;
mod routing;
mod session;
pub mod transport;

#[cfg(test)]
mod integration_tests;

pub use auth::Auth;
pub use channel::Channel;
pub use connection_options::ConnectionOptions;
pub use consumer::{Consumer, Deliveries, StopToken};
pub use delivery::Delivery;
pub use errors::{Error, ErrorKind, Result};
pub use exchange::{Exchange, ExchangeDeclareOptions, ExchangeType};
pub use field_table::{Arguments, FieldEntry, FieldKind, FieldTable, X_MATCH};
pub use queue::{Queue, QueueDeclareOptions};
pub use routing::{binding_matches, headers_match, topic_matches, HeaderMatch};
pub use session::{ConnectionTuning, Session};
pub use transport::tcp::IoStream;

#[allow(dead_code)]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
