//! AMQP 0-9-1 over a blocking socket.

use super::frame_buffer::FrameBuffer;
use super::reply_code::{ACCESS_REFUSED, REPLY_SUCCESS};
use super::serialize::{
    amqp_table, from_amqp_table, short_string, IntoAmqpClass, OutputBuffer, FRAME_OVERHEAD,
    PROTOCOL_HEADER,
};
use super::{Consume, ExchangeDeclare, Publish, QueueBind, QueueDeclare, QueueDeclareOk, Transport};
use crate::errors::*;
use crate::heartbeats::{HeartbeatState, Heartbeats};
use crate::{Arguments, Auth, ConnectionOptions, Delivery, FieldTable};
use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::basic::AMQPMethod as AmqpBasic;
use amq_protocol::protocol::basic::{
    AMQPProperties, Cancel, Consume as AmqpConsume, Deliver, Publish as AmqpPublish,
};
use amq_protocol::protocol::channel::AMQPMethod as AmqpChannel;
use amq_protocol::protocol::channel::{
    Close as ChannelClose, CloseOk as ChannelCloseOk, Open as ChannelOpen,
};
use amq_protocol::protocol::connection::AMQPMethod as AmqpConnection;
use amq_protocol::protocol::connection::{
    Close as ConnectionClose, CloseOk as ConnectionCloseOk, TuneOk,
};
use amq_protocol::protocol::exchange::AMQPMethod as AmqpExchange;
use amq_protocol::protocol::exchange::Declare as AmqpExchangeDeclare;
use amq_protocol::protocol::queue::AMQPMethod as AmqpQueue;
use amq_protocol::protocol::queue::{Bind, Declare as AmqpQueueDeclare};
use amq_protocol::protocol::AMQPClass;
use log::{debug, error, trace, warn};
use snafu::ResultExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

// Longest a blocking read waits before heartbeat bookkeeping runs again.
const IDLE_READ: Duration = Duration::from_secs(1);

/// A byte stream a [`TcpTransport`] can run over.
pub trait IoStream: Read + Write + Send + 'static {
    /// Bound how long a read may block. `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl IoStream for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ConnectionState {
    // Socket open, handshake not done yet.
    Fresh,
    Open,
    Closed,
}

// A message whose content frames are still arriving. `deliver` is None for a returned message,
// which is read off the wire and dropped.
struct PendingContent {
    deliver: Option<Deliver>,
    body_size: Option<u64>,
    headers: Option<FieldTable>,
    body: Vec<u8>,
}

/// A connection to an AMQP broker over a socket.
pub struct TcpTransport<S: IoStream = TcpStream> {
    stream: S,
    frames: FrameBuffer,
    options: ConnectionOptions,
    state: ConnectionState,
    tune: Option<TuneOk>,
    heartbeats: Heartbeats,
    open_channels: HashSet<u16>,
    // Channel of the request in flight; replies on any other channel are dropped.
    awaiting: Option<u16>,
    replies: VecDeque<(u16, AMQPClass)>,
    closed_channels: HashMap<u16, (u16, String)>,
    content: HashMap<u16, PendingContent>,
    deliveries: HashMap<(u16, String), VecDeque<Delivery>>,
    cancelled: HashSet<(u16, String)>,
}

impl TcpTransport<TcpStream> {
    /// Open a socket to `host:port`. Authentication happens in [`login`](#method.login).
    pub fn connect(host: &str, port: u16, options: ConnectionOptions) -> Result<TcpTransport> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .context(ResolveHostSnafu { host, port })?
            .collect();

        let stream = match options.connection_timeout {
            None => TcpStream::connect(&addrs[..]),
            Some(timeout) => {
                let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
                let mut connected = None;
                for addr in &addrs {
                    match TcpStream::connect_timeout(addr, timeout) {
                        Ok(stream) => {
                            connected = Some(stream);
                            break;
                        }
                        Err(err) => last_err = err,
                    }
                }
                connected.ok_or(last_err)
            }
        }
        .context(ConnectSnafu { host, port })?;
        stream.set_nodelay(true).context(ConnectSnafu { host, port })?;
        debug!("connected to {}:{}", host, port);

        Ok(TcpTransport::with_stream(stream, options))
    }
}

impl<S: IoStream> TcpTransport<S> {
    /// Speak AMQP over an already-connected stream.
    pub fn with_stream(stream: S, options: ConnectionOptions) -> TcpTransport<S> {
        TcpTransport {
            stream,
            frames: FrameBuffer::new(),
            options,
            state: ConnectionState::Fresh,
            tune: None,
            heartbeats: Heartbeats::new(0, Instant::now()),
            open_channels: HashSet::new(),
            awaiting: None,
            replies: VecDeque::new(),
            closed_channels: HashMap::new(),
            content: HashMap::new(),
            deliveries: HashMap::new(),
            cancelled: HashSet::new(),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let res = self
            .stream
            .write_all(bytes)
            .and_then(|()| self.stream.flush())
            .context(IoSnafu);
        if res.is_err() {
            self.state = ConnectionState::Closed;
        }
        res?;
        self.heartbeats.record_write(Instant::now());
        Ok(())
    }

    fn send<M: IntoAmqpClass>(&mut self, channel_id: u16, method: M) -> Result<()> {
        let mut buf = OutputBuffer::empty();
        buf.push_method(channel_id, method)?;
        trace!("sending {} bytes on channel {}", buf.as_bytes().len(), channel_id);
        self.write_bytes(buf.as_bytes())
    }

    fn send_heartbeat(&mut self) -> Result<()> {
        let mut buf = OutputBuffer::empty();
        buf.push_heartbeat()?;
        self.write_bytes(buf.as_bytes())
    }

    // Read whatever arrives within `wait` and act on it.
    fn pump(&mut self, wait: Duration) -> Result<()> {
        let res = self.pump_inner(wait);
        if let Err(err) = &res {
            if err.closes_connection() {
                self.state = ConnectionState::Closed;
            }
        }
        res
    }

    fn pump_inner(&mut self, wait: Duration) -> Result<()> {
        let wait = match self.heartbeats.poll_interval() {
            Some(poll) => Duration::min(wait, poll),
            None => wait,
        };
        let wait = Duration::max(wait, Duration::from_millis(1));
        self.stream.set_read_timeout(Some(wait)).context(IoSnafu)?;

        let mut frames = Vec::new();
        let n = self.frames.read_from(&mut self.stream, |frame| {
            frames.push(frame);
            Ok(())
        })?;
        let now = Instant::now();
        if n > 0 {
            self.heartbeats.record_read(now);
        }
        for frame in frames {
            self.handle_frame(frame)?;
        }

        match self.heartbeats.check(now) {
            HeartbeatState::Idle => Ok(()),
            HeartbeatState::SendHeartbeat => self.send_heartbeat(),
            HeartbeatState::Expired => {
                error!("missed heartbeats from server - closing connection");
                MissedServerHeartbeatsSnafu.fail()
            }
        }
    }

    fn handle_frame(&mut self, frame: AMQPFrame) -> Result<()> {
        trace!("received {:?}", frame);
        match frame {
            AMQPFrame::Heartbeat(_) => Ok(()),
            AMQPFrame::Method(0, AMQPClass::Connection(AmqpConnection::Close(close))) => {
                if let Err(err) = self.send(0, AmqpConnection::CloseOk(ConnectionCloseOk {})) {
                    warn!("could not acknowledge connection close: {}", err);
                }
                self.state = ConnectionState::Closed;
                ServerClosedConnectionSnafu {
                    code: close.reply_code,
                    text: close.reply_text,
                }
                .fail()
            }
            AMQPFrame::Method(channel_id, AMQPClass::Channel(AmqpChannel::Close(close))) => {
                debug!(
                    "server closed channel {} (code={}, message={})",
                    channel_id, close.reply_code, close.reply_text
                );
                self.send(channel_id, AmqpChannel::CloseOk(ChannelCloseOk {}))?;
                self.forget_channel(channel_id);
                self.closed_channels
                    .insert(channel_id, (close.reply_code, close.reply_text));
                Ok(())
            }
            AMQPFrame::Method(channel_id, AMQPClass::Basic(AmqpBasic::Deliver(deliver))) => {
                self.start_content(channel_id, Some(deliver))
            }
            AMQPFrame::Method(channel_id, AMQPClass::Basic(AmqpBasic::Return(ret))) => {
                debug!("message returned on channel {}: {}", channel_id, ret.reply_text);
                self.start_content(channel_id, None)
            }
            AMQPFrame::Method(channel_id, AMQPClass::Basic(AmqpBasic::Cancel(cancel))) => {
                let consumer_tag = cancel.consumer_tag;
                debug!("server cancelled consumer {} on channel {}", consumer_tag, channel_id);
                self.deliveries.remove(&(channel_id, consumer_tag.clone()));
                self.cancelled.insert((channel_id, consumer_tag));
                Ok(())
            }
            AMQPFrame::Method(channel_id, method) => {
                if self.awaiting == Some(channel_id) {
                    self.replies.push_back((channel_id, method));
                } else {
                    debug!(
                        "dropping {:?} on channel {}; no request is waiting for it",
                        method, channel_id
                    );
                }
                Ok(())
            }
            AMQPFrame::Header(channel_id, _, header) => {
                match self.content.get_mut(&channel_id) {
                    Some(pending) if pending.body_size.is_none() => {
                        pending.body_size = Some(header.body_size);
                        pending.headers = match header.properties.headers() {
                            Some(headers) => Some(from_amqp_table(headers)?),
                            None => None,
                        };
                    }
                    _ => {
                        error!("unexpected content header on channel {}", channel_id);
                        return FrameUnexpectedSnafu.fail();
                    }
                }
                self.finish_content(channel_id);
                Ok(())
            }
            AMQPFrame::Body(channel_id, body) => {
                match self.content.get_mut(&channel_id) {
                    Some(pending) if pending.body_size.is_some() => {
                        pending.body.extend_from_slice(&body)
                    }
                    _ => {
                        error!("unexpected content body on channel {}", channel_id);
                        return FrameUnexpectedSnafu.fail();
                    }
                }
                self.finish_content(channel_id);
                Ok(())
            }
            other => {
                error!("do not know how to handle frame {:?}", other);
                FrameUnexpectedSnafu.fail()
            }
        }
    }

    fn start_content(&mut self, channel_id: u16, deliver: Option<Deliver>) -> Result<()> {
        let pending = PendingContent {
            deliver,
            body_size: None,
            headers: None,
            body: Vec::new(),
        };
        if self.content.insert(channel_id, pending).is_some() {
            error!("content interrupted by a new method on channel {}", channel_id);
            return FrameUnexpectedSnafu.fail();
        }
        Ok(())
    }

    fn finish_content(&mut self, channel_id: u16) {
        let complete = match self.content.get(&channel_id) {
            Some(PendingContent {
                body_size: Some(size),
                body,
                ..
            }) => body.len() as u64 >= *size,
            _ => false,
        };
        if !complete {
            return;
        }
        let pending = match self.content.remove(&channel_id) {
            Some(pending) => pending,
            None => return,
        };
        if let Some(deliver) = pending.deliver {
            let headers = pending.headers.as_ref().map(Arguments::from_table);
            let delivery = Delivery::new(
                deliver.consumer_tag.clone(),
                deliver.delivery_tag,
                deliver.redelivered,
                deliver.exchange,
                deliver.routing_key,
                pending.body,
                headers,
            );
            self.deliveries
                .entry((channel_id, deliver.consumer_tag))
                .or_insert_with(VecDeque::new)
                .push_back(delivery);
        }
    }

    fn forget_channel(&mut self, channel_id: u16) {
        self.open_channels.remove(&channel_id);
        self.content.remove(&channel_id);
        self.deliveries.retain(|(ch, _), _| *ch != channel_id);
        self.cancelled.retain(|(ch, _)| *ch != channel_id);
        self.replies.retain(|(ch, _)| *ch != channel_id);
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Fresh => NotAuthenticatedSnafu.fail(),
            ConnectionState::Open => Ok(()),
            ConnectionState::Closed => ClientClosedConnectionSnafu.fail(),
        }
    }

    // A channel close the server sent since the last call on this channel (for instance in
    // answer to a publish) is reported here.
    fn check_channel(&mut self, channel_id: u16) -> Result<()> {
        self.check_open()?;
        if let Some((code, text)) = self.closed_channels.remove(&channel_id) {
            return ServerClosedChannelSnafu {
                channel_id,
                code,
                text,
            }
            .fail();
        }
        if !self.open_channels.contains(&channel_id) {
            return ChannelNotOpenSnafu { channel_id }.fail();
        }
        Ok(())
    }

    fn wait_reply<F>(&mut self, channel_id: u16, is_reply: F) -> Result<AMQPClass>
    where
        F: Fn(&AMQPClass) -> bool,
    {
        self.awaiting = Some(channel_id);
        let res = self.wait_reply_inner(channel_id, is_reply);
        self.awaiting = None;
        self.replies.clear();
        res
    }

    fn wait_reply_inner<F>(&mut self, channel_id: u16, is_reply: F) -> Result<AMQPClass>
    where
        F: Fn(&AMQPClass) -> bool,
    {
        loop {
            let found = self
                .replies
                .iter()
                .position(|(ch, method)| *ch == channel_id && is_reply(method));
            if let Some((_, method)) = found.and_then(|pos| self.replies.remove(pos)) {
                return Ok(method);
            }
            if let Some((code, text)) = self.closed_channels.remove(&channel_id) {
                return ServerClosedChannelSnafu {
                    channel_id,
                    code,
                    text,
                }
                .fail();
            }
            self.pump(IDLE_READ)?;
        }
    }

    fn rpc<M, F>(&mut self, channel_id: u16, method: M, is_reply: F) -> Result<AMQPClass>
    where
        M: IntoAmqpClass,
        F: Fn(&AMQPClass) -> bool,
    {
        self.check_channel(channel_id)?;
        self.send(channel_id, method)?;
        self.wait_reply(channel_id, is_reply)
    }

    fn handshake(&mut self, auth: &Auth) -> Result<()> {
        self.write_bytes(PROTOCOL_HEADER)?;

        let start = match self.wait_reply(0, |m| {
            matches!(m, AMQPClass::Connection(AmqpConnection::Start(_)))
        })? {
            AMQPClass::Connection(AmqpConnection::Start(start)) => start,
            _ => return FrameUnexpectedSnafu.fail(),
        };
        if (start.version_major, start.version_minor) != (0, 9) {
            return UnsupportedProtocolSnafu.fail();
        }
        let start_ok = self.options.make_start_ok(auth, &start)?;
        self.send(0, AmqpConnection::StartOk(start_ok))?;

        let tune = match self.wait_reply(0, |m| {
            matches!(
                m,
                AMQPClass::Connection(AmqpConnection::Tune(_))
                    | AMQPClass::Connection(AmqpConnection::Secure(_))
            )
        }) {
            Ok(AMQPClass::Connection(AmqpConnection::Tune(tune))) => tune,
            Ok(_) => return SaslSecureNotSupportedSnafu.fail(),
            // Brokers either close the connection with ACCESS_REFUSED or just hang up when
            // credentials are rejected.
            Err(Error::ServerClosedConnection { code, .. }) if code == ACCESS_REFUSED => {
                return InvalidCredentialsSnafu {
                    username: auth.username(),
                }
                .fail()
            }
            Err(Error::UnexpectedSocketClose) => {
                return InvalidCredentialsSnafu {
                    username: auth.username(),
                }
                .fail()
            }
            Err(err) => return Err(err),
        };
        let tune_ok = self.options.make_tune_ok(&tune)?;
        debug!("sending handshake {:?}", tune_ok);
        self.send(0, AmqpConnection::TuneOk(tune_ok.clone()))?;
        self.heartbeats = Heartbeats::new(tune_ok.heartbeat, Instant::now());

        let open = self.options.make_open();
        self.send(0, AmqpConnection::Open(open))?;
        self.wait_reply(0, |m| {
            matches!(m, AMQPClass::Connection(AmqpConnection::OpenOk(_)))
        })?;
        debug!(
            "connection open (channel_max={}, frame_max={}, heartbeat={})",
            tune_ok.channel_max, tune_ok.frame_max, tune_ok.heartbeat
        );
        self.tune = Some(tune_ok);
        Ok(())
    }
}

impl<S: IoStream> Transport for TcpTransport<S> {
    fn login(&mut self, auth: &Auth) -> Result<()> {
        match self.state {
            ConnectionState::Fresh => (),
            ConnectionState::Open => return AlreadyAuthenticatedSnafu.fail(),
            ConnectionState::Closed => return ClientClosedConnectionSnafu.fail(),
        }
        match self.handshake(auth) {
            Ok(()) => {
                self.state = ConnectionState::Open;
                Ok(())
            }
            Err(err) => {
                // a failed handshake leaves nothing to talk to
                self.state = ConnectionState::Closed;
                Err(err)
            }
        }
    }

    fn channel_max(&self) -> u16 {
        self.tune
            .as_ref()
            .map(|tune| tune.channel_max)
            .unwrap_or_else(u16::max_value)
    }

    fn channel_open(&mut self, channel_id: u16) -> Result<()> {
        self.check_open()?;
        self.closed_channels.remove(&channel_id);
        let open = ChannelOpen {
            out_of_band: String::new(),
        };
        self.send(channel_id, AmqpChannel::Open(open))?;
        self.wait_reply(channel_id, |m| {
            matches!(m, AMQPClass::Channel(AmqpChannel::OpenOk(_)))
        })?;
        self.open_channels.insert(channel_id);
        Ok(())
    }

    fn channel_close(&mut self, channel_id: u16) -> Result<()> {
        let close = ChannelClose {
            reply_code: REPLY_SUCCESS,
            reply_text: "OK".to_string(),
            class_id: 0,
            method_id: 0,
        };
        let res = self.rpc(channel_id, AmqpChannel::Close(close), |m| {
            matches!(m, AMQPClass::Channel(AmqpChannel::CloseOk(_)))
        });
        self.forget_channel(channel_id);
        res.map(|_| ())
    }

    fn exchange_declare(&mut self, channel_id: u16, declare: ExchangeDeclare) -> Result<()> {
        let method = AmqpExchangeDeclare {
            ticket: 0,
            exchange: short_string(declare.exchange)?,
            type_: short_string(declare.type_)?,
            passive: declare.passive,
            durable: declare.durable,
            auto_delete: declare.auto_delete,
            internal: declare.internal,
            nowait: false,
            arguments: amqp_table(&declare.arguments),
        };
        self.rpc(channel_id, AmqpExchange::Declare(method), |m| {
            matches!(m, AMQPClass::Exchange(AmqpExchange::DeclareOk(_)))
        })
        .map(|_| ())
    }

    fn queue_declare(&mut self, channel_id: u16, declare: QueueDeclare) -> Result<QueueDeclareOk> {
        let method = AmqpQueueDeclare {
            ticket: 0,
            queue: short_string(declare.queue)?,
            passive: declare.passive,
            durable: declare.durable,
            exclusive: declare.exclusive,
            auto_delete: declare.auto_delete,
            nowait: false,
            arguments: amqp_table(&declare.arguments),
        };
        match self.rpc(channel_id, AmqpQueue::Declare(method), |m| {
            matches!(m, AMQPClass::Queue(AmqpQueue::DeclareOk(_)))
        })? {
            AMQPClass::Queue(AmqpQueue::DeclareOk(ok)) => Ok(QueueDeclareOk {
                queue: ok.queue,
                message_count: ok.message_count,
                consumer_count: ok.consumer_count,
            }),
            _ => FrameUnexpectedSnafu.fail(),
        }
    }

    fn queue_bind(&mut self, channel_id: u16, bind: QueueBind) -> Result<()> {
        let method = Bind {
            ticket: 0,
            queue: short_string(bind.queue)?,
            exchange: short_string(bind.exchange)?,
            routing_key: short_string(bind.routing_key)?,
            nowait: false,
            arguments: amqp_table(&bind.arguments),
        };
        self.rpc(channel_id, AmqpQueue::Bind(method), |m| {
            matches!(m, AMQPClass::Queue(AmqpQueue::BindOk(_)))
        })
        .map(|_| ())
    }

    fn basic_publish(&mut self, channel_id: u16, publish: Publish, content: &[u8]) -> Result<()> {
        self.check_channel(channel_id)?;
        let frame_max = self
            .tune
            .as_ref()
            .map(|tune| tune.frame_max)
            .unwrap_or_else(u32::max_value);
        let max_body = usize::max(frame_max as usize, FRAME_OVERHEAD + 1) - FRAME_OVERHEAD;

        let method = AmqpPublish {
            ticket: 0,
            exchange: short_string(publish.exchange)?,
            routing_key: short_string(publish.routing_key)?,
            mandatory: publish.mandatory,
            immediate: publish.immediate,
        };
        let mut properties = AMQPProperties::default();
        if let Some(headers) = &publish.headers {
            properties = properties.with_headers(amqp_table(headers));
        }

        let mut buf = OutputBuffer::empty();
        buf.push_method(channel_id, AmqpBasic::Publish(method))?;
        buf.push_content_header(
            channel_id,
            AmqpPublish::get_class_id(),
            content.len(),
            &properties,
        )?;
        for chunk in content.chunks(max_body) {
            buf.push_content_body(channel_id, chunk)?;
        }
        self.write_bytes(buf.as_bytes())
    }

    fn basic_consume(&mut self, channel_id: u16, consume: Consume) -> Result<String> {
        let method = AmqpConsume {
            ticket: 0,
            queue: short_string(consume.queue)?,
            consumer_tag: short_string(consume.consumer_tag)?,
            no_local: consume.no_local,
            no_ack: consume.no_ack,
            exclusive: consume.exclusive,
            nowait: false,
            arguments: amqp_table(&consume.arguments),
        };
        match self.rpc(channel_id, AmqpBasic::Consume(method), |m| {
            matches!(m, AMQPClass::Basic(AmqpBasic::ConsumeOk(_)))
        })? {
            AMQPClass::Basic(AmqpBasic::ConsumeOk(ok)) => {
                self.deliveries
                    .entry((channel_id, ok.consumer_tag.clone()))
                    .or_insert_with(VecDeque::new);
                Ok(ok.consumer_tag)
            }
            _ => FrameUnexpectedSnafu.fail(),
        }
    }

    fn basic_cancel(&mut self, channel_id: u16, consumer_tag: &str) -> Result<()> {
        let key = (channel_id, consumer_tag.to_string());
        if self.cancelled.remove(&key) {
            // the server already dropped it
            return Ok(());
        }
        let method = Cancel {
            consumer_tag: consumer_tag.to_string(),
            nowait: false,
        };
        let res = self.rpc(channel_id, AmqpBasic::Cancel(method), |m| match m {
            AMQPClass::Basic(AmqpBasic::CancelOk(ok)) => ok.consumer_tag == consumer_tag,
            _ => false,
        });
        self.deliveries.remove(&key);
        res.map(|_| ())
    }

    fn wait_for_delivery(
        &mut self,
        channel_id: u16,
        consumer_tag: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>> {
        let key = (channel_id, consumer_tag.to_string());
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.deliveries.get_mut(&key).and_then(VecDeque::pop_front) {
                return Ok(Some(delivery));
            }
            if self.cancelled.remove(&key) {
                return ConsumerCancelledSnafu {
                    channel_id,
                    consumer_tag,
                }
                .fail();
            }
            self.check_channel(channel_id)?;
            if !self.deliveries.contains_key(&key) {
                return UnknownConsumerTagSnafu {
                    channel_id,
                    consumer_tag,
                }
                .fail();
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.pump(deadline - now)?;
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => return ClientClosedConnectionSnafu.fail(),
            ConnectionState::Fresh => {
                self.state = ConnectionState::Closed;
                return Ok(());
            }
            ConnectionState::Open => (),
        }
        let close = ConnectionClose {
            reply_code: REPLY_SUCCESS,
            reply_text: "OK".to_string(),
            class_id: 0,
            method_id: 0,
        };
        let res = self
            .send(0, AmqpConnection::Close(close))
            .and_then(|()| {
                self.wait_reply(0, |m| {
                    matches!(m, AMQPClass::Connection(AmqpConnection::CloseOk(_)))
                })
            });
        self.state = ConnectionState::Closed;
        self.open_channels.clear();
        res.map(|_| ())
    }
}
