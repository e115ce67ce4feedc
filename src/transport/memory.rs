//! An AMQP broker living inside the process.
//!
//! [`MemoryBroker`] keeps exchanges, queues, and bindings in shared memory and follows RabbitMQ's
//! rules for declaring, binding, routing, and consuming. Each [`MemoryTransport`] obtained from
//! [`MemoryBroker::connect`] behaves like one AMQP connection to it:
//!
//! ```rust
//! use warren::transport::memory::MemoryBroker;
//! use warren::{ExchangeType, QueueDeclareOptions, Session};
//!
//! # fn main() -> warren::Result<()> {
//! let broker = MemoryBroker::new();
//! let session = Session::with_transport(broker.connect());
//! session.login("guest", "guest")?;
//!
//! let channel = session.open_channel()?;
//! let queue = channel.declare_queue("jobs", QueueDeclareOptions::default())?;
//! let exchange = channel.declare_exchange("work", ExchangeType::Direct, Default::default())?;
//! queue.bind_to_exchange(&exchange, "jobs")?;
//! exchange.publish("hello", "jobs")?;
//!
//! assert_eq!(broker.queue_len("jobs"), Some(1));
//! # Ok(())
//! # }
//! ```

use super::reply_code::*;
use super::{Consume, ExchangeDeclare, Publish, QueueBind, QueueDeclare, QueueDeclareOk, Transport};
use crate::errors::*;
use crate::routing::{binding_matches, HeaderMatch};
use crate::{Arguments, Auth, Delivery, ExchangeType};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const VIRTUAL_HOST: &str = "/";

/// Shared state of an in-process broker. Cloning gives another handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for MemoryBroker {
    fn default() -> MemoryBroker {
        MemoryBroker::new()
    }
}

impl MemoryBroker {
    /// Create a broker with a `guest`/`guest` user and the standard `amq.*` exchanges.
    pub fn new() -> MemoryBroker {
        let mut state = BrokerState::default();
        state.users.insert("guest".to_string(), "guest".to_string());
        let builtin = [
            ("amq.direct", ExchangeType::Direct),
            ("amq.fanout", ExchangeType::Fanout),
            ("amq.topic", ExchangeType::Topic),
            ("amq.headers", ExchangeType::Headers),
        ];
        for &(name, type_) in &builtin {
            state.exchanges.insert(
                name.to_string(),
                ExchangeState {
                    type_,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    bindings: Vec::new(),
                },
            );
        }
        MemoryBroker {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Allow logins as `username`, replacing any previous password.
    pub fn add_user<U: Into<String>, P: Into<String>>(&self, username: U, password: P) {
        self.state
            .lock()
            .users
            .insert(username.into(), password.into());
    }

    /// Open a new connection to this broker.
    pub fn connect(&self) -> MemoryTransport {
        let connection_id = {
            let mut state = self.state.lock();
            state.next_connection_id += 1;
            state.next_connection_id
        };
        debug!("memory broker accepted connection {}", connection_id);
        MemoryTransport {
            broker: self.clone(),
            connection_id,
            authenticated: false,
            closed: false,
            channels: HashMap::new(),
        }
    }

    /// Number of messages waiting in a queue, or `None` if the queue does not exist.
    pub fn queue_len(&self, queue: &str) -> Option<usize> {
        self.state.lock().queues.get(queue).map(|q| q.messages.len())
    }

    /// Names of all existing queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Type of an existing exchange.
    pub fn exchange_type(&self, exchange: &str) -> Option<ExchangeType> {
        self.state.lock().exchanges.get(exchange).map(|e| e.type_)
    }
}

// A reply code and text the broker closes a channel with.
#[derive(Debug)]
struct Refusal {
    code: u16,
    text: String,
}

fn refuse<T, S: Into<String>>(code: u16, text: S) -> std::result::Result<T, Refusal> {
    Err(Refusal {
        code,
        text: text.into(),
    })
}

type Refusable<T> = std::result::Result<T, Refusal>;

#[derive(Default)]
struct BrokerState {
    users: HashMap<String, String>,
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
    next_connection_id: u64,
    next_generated_id: u64,
}

struct ExchangeState {
    type_: ExchangeType,
    durable: bool,
    auto_delete: bool,
    internal: bool,
    bindings: Vec<Binding>,
}

#[derive(PartialEq)]
struct Binding {
    queue: String,
    routing_key: String,
    arguments: Arguments,
}

struct QueueState {
    durable: bool,
    exclusive_owner: Option<u64>,
    auto_delete: bool,
    arguments: Arguments,
    messages: VecDeque<Message>,
    consumers: Vec<ConsumerState>,
    next_consumer: usize,
}

struct Message {
    exchange: String,
    routing_key: String,
    content: Vec<u8>,
    headers: Option<Arguments>,
}

struct ConsumerState {
    tag: String,
    connection_id: u64,
    channel_id: u16,
    exclusive: bool,
    sender: Sender<Delivery>,
    delivery_tags: Arc<AtomicU64>,
}

impl QueueState {
    fn locked_by_other(&self, connection_id: u64) -> bool {
        self.exclusive_owner
            .map(|owner| owner != connection_id)
            .unwrap_or(false)
    }

    // Hand queued messages to consumers in turn until one side runs out.
    fn dispatch(&mut self) {
        while !self.consumers.is_empty() {
            let message = match self.messages.pop_front() {
                Some(message) => message,
                None => return,
            };
            let index = self.next_consumer % self.consumers.len();
            let consumer = &self.consumers[index];
            let delivery = Delivery::new(
                consumer.tag.clone(),
                consumer.delivery_tags.fetch_add(1, Ordering::SeqCst) + 1,
                false,
                message.exchange.clone(),
                message.routing_key.clone(),
                message.content.clone(),
                message.headers.clone(),
            );
            if consumer.sender.send(delivery).is_ok() {
                self.next_consumer = index + 1;
            } else {
                trace!("dropping consumer {} with no receiver", consumer.tag);
                self.consumers.remove(index);
                self.messages.push_front(message);
            }
        }
    }
}

fn no_exchange(name: &str) -> Refusal {
    Refusal {
        code: NOT_FOUND,
        text: format!("NOT_FOUND - no exchange '{}' in vhost '{}'", name, VIRTUAL_HOST),
    }
}

fn no_queue(name: &str) -> Refusal {
    Refusal {
        code: NOT_FOUND,
        text: format!("NOT_FOUND - no queue '{}' in vhost '{}'", name, VIRTUAL_HOST),
    }
}

fn locked(name: &str) -> Refusal {
    Refusal {
        code: RESOURCE_LOCKED,
        text: format!(
            "RESOURCE_LOCKED - cannot obtain exclusive access to locked queue '{}' in vhost '{}'",
            name, VIRTUAL_HOST
        ),
    }
}

fn inequivalent<T: std::fmt::Debug>(
    arg: &str,
    what: &str,
    name: &str,
    received: T,
    current: T,
) -> Refusal {
    Refusal {
        code: PRECONDITION_FAILED,
        text: format!(
            "PRECONDITION_FAILED - inequivalent arg '{}' for {} '{}' in vhost '{}': received {:?} but current is {:?}",
            arg, what, name, VIRTUAL_HOST, received, current
        ),
    }
}

impl BrokerState {
    fn generate_name(&mut self, prefix: &str) -> String {
        self.next_generated_id += 1;
        format!("{}{}", prefix, self.next_generated_id)
    }

    fn exchange_declare(&mut self, declare: ExchangeDeclare) -> Refusable<()> {
        let name = declare.exchange;
        if name.is_empty() && !declare.passive {
            return refuse(
                ACCESS_REFUSED,
                "ACCESS_REFUSED - operation not permitted on the default exchange",
            );
        }
        if declare.passive {
            if name.is_empty() || self.exchanges.contains_key(&name) {
                return Ok(());
            }
            return Err(no_exchange(&name));
        }

        let type_ = match declare.type_.parse::<ExchangeType>() {
            Ok(type_) => type_,
            Err(_) => {
                return refuse(
                    COMMAND_INVALID,
                    format!("COMMAND_INVALID - unknown exchange type '{}'", declare.type_),
                )
            }
        };

        if let Some(existing) = self.exchanges.get(&name) {
            let what = "exchange";
            if existing.type_ != type_ {
                return Err(inequivalent("type", what, &name, type_, existing.type_));
            }
            if existing.durable != declare.durable {
                return Err(inequivalent("durable", what, &name, declare.durable, existing.durable));
            }
            if existing.auto_delete != declare.auto_delete {
                return Err(inequivalent(
                    "auto_delete",
                    what,
                    &name,
                    declare.auto_delete,
                    existing.auto_delete,
                ));
            }
            if existing.internal != declare.internal {
                return Err(inequivalent(
                    "internal",
                    what,
                    &name,
                    declare.internal,
                    existing.internal,
                ));
            }
            return Ok(());
        }

        if name.starts_with("amq.") {
            return refuse(
                ACCESS_REFUSED,
                format!(
                    "ACCESS_REFUSED - exchange name '{}' contains reserved prefix 'amq.*'",
                    name
                ),
            );
        }

        debug!("declared {} exchange {}", type_.as_ref(), name);
        self.exchanges.insert(
            name,
            ExchangeState {
                type_,
                durable: declare.durable,
                auto_delete: declare.auto_delete,
                internal: declare.internal,
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    fn queue_declare(&mut self, connection_id: u64, declare: QueueDeclare) -> Refusable<QueueDeclareOk> {
        let name = if declare.queue.is_empty() && !declare.passive {
            self.generate_name("amq.gen-")
        } else {
            declare.queue
        };
        let arguments = Arguments::from_table(&declare.arguments);

        if let Some(existing) = self.queues.get(&name) {
            if existing.locked_by_other(connection_id) {
                return Err(locked(&name));
            }
            if !declare.passive {
                let what = "queue";
                if existing.durable != declare.durable {
                    return Err(inequivalent("durable", what, &name, declare.durable, existing.durable));
                }
                let exclusive = existing.exclusive_owner.is_some();
                if exclusive != declare.exclusive {
                    return Err(inequivalent("exclusive", what, &name, declare.exclusive, exclusive));
                }
                if existing.auto_delete != declare.auto_delete {
                    return Err(inequivalent(
                        "auto_delete",
                        what,
                        &name,
                        declare.auto_delete,
                        existing.auto_delete,
                    ));
                }
                if existing.arguments != arguments {
                    return Err(inequivalent(
                        "arguments",
                        what,
                        &name,
                        &arguments,
                        &existing.arguments,
                    ));
                }
            }
            return Ok(QueueDeclareOk {
                queue: name,
                message_count: existing.messages.len() as u32,
                consumer_count: existing.consumers.len() as u32,
            });
        }

        if declare.passive {
            return Err(no_queue(&name));
        }
        if name.starts_with("amq.") && !name.starts_with("amq.gen-") {
            return refuse(
                ACCESS_REFUSED,
                format!(
                    "ACCESS_REFUSED - queue name '{}' contains reserved prefix 'amq.*'",
                    name
                ),
            );
        }

        debug!("declared queue {}", name);
        self.queues.insert(
            name.clone(),
            QueueState {
                durable: declare.durable,
                exclusive_owner: if declare.exclusive {
                    Some(connection_id)
                } else {
                    None
                },
                auto_delete: declare.auto_delete,
                arguments,
                messages: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
            },
        );
        Ok(QueueDeclareOk {
            queue: name,
            message_count: 0,
            consumer_count: 0,
        })
    }

    fn queue_bind(&mut self, connection_id: u64, bind: QueueBind) -> Refusable<()> {
        if bind.exchange.is_empty() {
            return refuse(
                ACCESS_REFUSED,
                "ACCESS_REFUSED - operation not permitted on the default exchange",
            );
        }
        match self.queues.get(&bind.queue) {
            None => return Err(no_queue(&bind.queue)),
            Some(queue) if queue.locked_by_other(connection_id) => return Err(locked(&bind.queue)),
            Some(_) => (),
        }
        let exchange = match self.exchanges.get_mut(&bind.exchange) {
            Some(exchange) => exchange,
            None => return Err(no_exchange(&bind.exchange)),
        };

        let arguments = Arguments::from_table(&bind.arguments);
        if exchange.type_ == ExchangeType::Headers && HeaderMatch::from_arguments(&arguments).is_none() {
            return refuse(
                PRECONDITION_FAILED,
                format!(
                    "PRECONDITION_FAILED - Invalid x-match field value {:?}",
                    arguments.get(crate::field_table::X_MATCH).unwrap_or_default()
                ),
            );
        }

        let binding = Binding {
            queue: bind.queue,
            routing_key: bind.routing_key,
            arguments,
        };
        if !exchange.bindings.contains(&binding) {
            trace!(
                "bound queue {} to exchange {} with key {:?}",
                binding.queue,
                bind.exchange,
                binding.routing_key
            );
            exchange.bindings.push(binding);
        }
        Ok(())
    }

    fn publish(&mut self, publish: Publish, content: &[u8]) -> Refusable<()> {
        let headers = publish.headers.as_ref().map(Arguments::from_table);

        let targets: Vec<String> = if publish.exchange.is_empty() {
            if self.queues.contains_key(&publish.routing_key) {
                vec![publish.routing_key.clone()]
            } else {
                Vec::new()
            }
        } else {
            let exchange = match self.exchanges.get(&publish.exchange) {
                Some(exchange) => exchange,
                None => return Err(no_exchange(&publish.exchange)),
            };
            if exchange.internal {
                return refuse(
                    ACCESS_REFUSED,
                    format!(
                        "ACCESS_REFUSED - cannot publish to internal exchange '{}'",
                        publish.exchange
                    ),
                );
            }
            let mut targets = Vec::new();
            for binding in &exchange.bindings {
                let matched = binding_matches(
                    exchange.type_,
                    &binding.routing_key,
                    &binding.arguments,
                    &publish.routing_key,
                    headers.as_ref(),
                );
                if matched && !targets.contains(&binding.queue) {
                    targets.push(binding.queue.clone());
                }
            }
            targets
        };

        if targets.is_empty() {
            debug!(
                "dropping unroutable message to exchange {:?} with key {:?}",
                publish.exchange, publish.routing_key
            );
        }
        for name in targets {
            if let Some(queue) = self.queues.get_mut(&name) {
                queue.messages.push_back(Message {
                    exchange: publish.exchange.clone(),
                    routing_key: publish.routing_key.clone(),
                    content: content.to_vec(),
                    headers: headers.clone(),
                });
                queue.dispatch();
            }
        }
        Ok(())
    }

    fn consume(
        &mut self,
        connection_id: u64,
        channel_id: u16,
        consume: Consume,
        consumer_tags: &HashMap<String, Receiver<Delivery>>,
        delivery_tags: &Arc<AtomicU64>,
    ) -> Refusable<(String, Receiver<Delivery>)> {
        let tag = if consume.consumer_tag.is_empty() {
            self.generate_name("amq.ctag-")
        } else {
            consume.consumer_tag
        };
        if consumer_tags.contains_key(&tag) {
            return refuse(
                NOT_ALLOWED,
                format!("NOT_ALLOWED - attempt to reuse consumer tag '{}'", tag),
            );
        }

        let queue = match self.queues.get_mut(&consume.queue) {
            Some(queue) => queue,
            None => return Err(no_queue(&consume.queue)),
        };
        if queue.locked_by_other(connection_id) {
            return Err(locked(&consume.queue));
        }
        let exclusive_use = queue.consumers.iter().any(|c| c.exclusive);
        if exclusive_use || (consume.exclusive && !queue.consumers.is_empty()) {
            return refuse(
                ACCESS_REFUSED,
                format!(
                    "ACCESS_REFUSED - queue '{}' in vhost '{}' in exclusive use",
                    consume.queue, VIRTUAL_HOST
                ),
            );
        }

        let (sender, receiver) = crossbeam_channel::unbounded();
        queue.consumers.push(ConsumerState {
            tag: tag.clone(),
            connection_id,
            channel_id,
            exclusive: consume.exclusive,
            sender,
            delivery_tags: Arc::clone(delivery_tags),
        });
        debug!("consumer {} started on queue {}", tag, consume.queue);
        queue.dispatch();
        Ok((tag, receiver))
    }

    // Remove every consumer matching the predicate, deleting auto-delete queues left empty.
    fn remove_consumers<F>(&mut self, mut predicate: F)
    where
        F: FnMut(&ConsumerState) -> bool,
    {
        let mut emptied = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|c| !predicate(c));
            if queue.auto_delete && before > 0 && queue.consumers.is_empty() {
                emptied.push(name.clone());
            }
        }
        for name in emptied {
            self.delete_queue(&name);
        }
    }

    fn delete_queue(&mut self, name: &str) {
        debug!("deleting queue {}", name);
        self.queues.remove(name);
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|b| b.queue != name);
        }
    }

    fn close_connection(&mut self, connection_id: u64) {
        self.remove_consumers(|c| c.connection_id == connection_id);
        let exclusive: Vec<_> = self
            .queues
            .iter()
            .filter(|(_, q)| q.exclusive_owner == Some(connection_id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in exclusive {
            self.delete_queue(&name);
        }
    }
}

struct ChannelState {
    consumers: HashMap<String, Receiver<Delivery>>,
    delivery_tags: Arc<AtomicU64>,
}

/// One connection to a [`MemoryBroker`].
pub struct MemoryTransport {
    broker: MemoryBroker,
    connection_id: u64,
    authenticated: bool,
    closed: bool,
    channels: HashMap<u16, ChannelState>,
}

impl MemoryTransport {
    fn check_connection(&self) -> Result<()> {
        if self.closed {
            return ClientClosedConnectionSnafu.fail();
        }
        if !self.authenticated {
            return NotAuthenticatedSnafu.fail();
        }
        Ok(())
    }

    // Run a broker operation on an open channel. A refusal closes the channel.
    fn on_channel<T, F>(&mut self, channel_id: u16, f: F) -> Result<T>
    where
        F: FnOnce(&mut BrokerState, u64, &mut ChannelState) -> Refusable<T>,
    {
        self.check_connection()?;
        let channel = match self.channels.get_mut(&channel_id) {
            Some(channel) => channel,
            None => return ChannelNotOpenSnafu { channel_id }.fail(),
        };
        let mut state = self.broker.state.lock();
        match f(&mut *state, self.connection_id, channel) {
            Ok(t) => Ok(t),
            Err(refusal) => {
                debug!(
                    "closing channel {} on connection {}: {}",
                    channel_id, self.connection_id, refusal.text
                );
                let connection_id = self.connection_id;
                state.remove_consumers(|c| c.connection_id == connection_id && c.channel_id == channel_id);
                drop(state);
                self.channels.remove(&channel_id);
                ServerClosedChannelSnafu {
                    channel_id,
                    code: refusal.code,
                    text: refusal.text,
                }
                .fail()
            }
        }
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.channels.clear();
            self.broker.state.lock().close_connection(self.connection_id);
            debug!("memory broker connection {} closed", self.connection_id);
        }
    }
}

impl Transport for MemoryTransport {
    fn login(&mut self, auth: &Auth) -> Result<()> {
        if self.closed {
            return ClientClosedConnectionSnafu.fail();
        }
        let (username, password) = match auth {
            Auth::Plain { username, password } => (username, password),
            Auth::External => {
                return UnsupportedAuthMechanismSnafu {
                    available: "PLAIN",
                    requested: auth.mechanism(),
                }
                .fail()
            }
        };
        let valid = self.broker.state.lock().users.get(username) == Some(password);
        self.authenticated = valid;
        if valid {
            Ok(())
        } else {
            InvalidCredentialsSnafu {
                username: username.as_str(),
            }
            .fail()
        }
    }

    fn channel_open(&mut self, channel_id: u16) -> Result<()> {
        self.check_connection()?;
        if self.channels.contains_key(&channel_id) {
            return ServerClosedChannelSnafu {
                channel_id,
                code: CHANNEL_ERROR,
                text: format!("CHANNEL_ERROR - second 'channel.open' seen on {}", channel_id),
            }
            .fail();
        }
        self.channels.insert(
            channel_id,
            ChannelState {
                consumers: HashMap::new(),
                delivery_tags: Arc::new(AtomicU64::new(0)),
            },
        );
        Ok(())
    }

    fn channel_close(&mut self, channel_id: u16) -> Result<()> {
        self.check_connection()?;
        if self.channels.remove(&channel_id).is_none() {
            return ChannelNotOpenSnafu { channel_id }.fail();
        }
        let connection_id = self.connection_id;
        self.broker
            .state
            .lock()
            .remove_consumers(|c| c.connection_id == connection_id && c.channel_id == channel_id);
        Ok(())
    }

    fn exchange_declare(&mut self, channel_id: u16, declare: ExchangeDeclare) -> Result<()> {
        self.on_channel(channel_id, |state, _, _| state.exchange_declare(declare))
    }

    fn queue_declare(&mut self, channel_id: u16, declare: QueueDeclare) -> Result<QueueDeclareOk> {
        self.on_channel(channel_id, |state, connection_id, _| {
            state.queue_declare(connection_id, declare)
        })
    }

    fn queue_bind(&mut self, channel_id: u16, bind: QueueBind) -> Result<()> {
        self.on_channel(channel_id, |state, connection_id, _| {
            state.queue_bind(connection_id, bind)
        })
    }

    fn basic_publish(&mut self, channel_id: u16, publish: Publish, content: &[u8]) -> Result<()> {
        self.on_channel(channel_id, |state, _, _| state.publish(publish, content))
    }

    fn basic_consume(&mut self, channel_id: u16, consume: Consume) -> Result<String> {
        self.on_channel(channel_id, |state, connection_id, channel| {
            let (tag, receiver) = state.consume(
                connection_id,
                channel_id,
                consume,
                &channel.consumers,
                &channel.delivery_tags,
            )?;
            channel.consumers.insert(tag.clone(), receiver);
            Ok(tag)
        })
    }

    fn basic_cancel(&mut self, channel_id: u16, consumer_tag: &str) -> Result<()> {
        self.on_channel(channel_id, |state, connection_id, channel| {
            channel.consumers.remove(consumer_tag);
            state.remove_consumers(|c| {
                c.connection_id == connection_id && c.channel_id == channel_id && c.tag == consumer_tag
            });
            Ok(())
        })
    }

    fn wait_for_delivery(
        &mut self,
        channel_id: u16,
        consumer_tag: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>> {
        self.check_connection()?;
        let channel = match self.channels.get(&channel_id) {
            Some(channel) => channel,
            None => return ChannelNotOpenSnafu { channel_id }.fail(),
        };
        let receiver = match channel.consumers.get(consumer_tag) {
            Some(receiver) => receiver,
            None => {
                return UnknownConsumerTagSnafu {
                    channel_id,
                    consumer_tag,
                }
                .fail()
            }
        };
        match receiver.recv_timeout(timeout) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(channel) = self.channels.get_mut(&channel_id) {
                    channel.consumers.remove(consumer_tag);
                }
                ConsumerCancelledSnafu {
                    channel_id,
                    consumer_tag,
                }
                .fail()
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return ClientClosedConnectionSnafu.fail();
        }
        self.release();
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.release();
    }
}
