use snafu::Snafu;
use std::io;

/// A type alias for handling errors throughout warren.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Specific error cases returned by warren.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// Failed to open the TCP connection to the broker.
    #[snafu(display("could not connect to {}:{}: {}", host, port, source))]
    Connect {
        host: String,
        port: u16,
        source: io::Error,
    },

    /// Failed to resolve the broker's host name.
    #[snafu(display("could not resolve {}:{}: {}", host, port, source))]
    ResolveHost {
        host: String,
        port: u16,
        source: io::Error,
    },

    /// The supplied URL could not be parsed.
    #[snafu(display("could not parse url: {}", source))]
    ParseUrl { source: url::ParseError },

    /// The supplied URL is not a usable AMQP URL.
    #[snafu(display("invalid AMQP url: {}", url))]
    InvalidUrl { url: String },

    /// An I/O error occurred while reading from or writing to the socket.
    #[snafu(display("I/O error: {}", source))]
    Io { source: io::Error },

    /// The underlying socket was closed unexpectedly.
    #[snafu(display("underlying socket closed unexpectedly"))]
    UnexpectedSocketClose,

    /// The server sent data that is not a valid AMQP frame.
    #[snafu(display("received malformed data - expected AMQP frame"))]
    MalformedFrame,

    /// Frame generation failed for a reason other than buffer size.
    #[snafu(display("internal serialization error (THIS IS A BUG)"))]
    InternalSerialization,

    /// The server does not speak AMQP 0-9-1.
    #[snafu(display("server rejected the AMQP 0-9-1 protocol header"))]
    UnsupportedProtocol,

    /// The server sent a frame that was not expected at this point of the protocol.
    #[snafu(display("AMQP protocol error - received unexpected frame"))]
    FrameUnexpected,

    /// The requested SASL mechanism is not offered by the server.
    #[snafu(display(
        "requested auth mechanism unavailable (available = {}, requested = {})",
        available,
        requested
    ))]
    UnsupportedAuthMechanism { available: String, requested: String },

    /// The requested locale is not offered by the server.
    #[snafu(display(
        "requested locale unavailable (available = {}, requested = {})",
        available,
        requested
    ))]
    UnsupportedLocale { available: String, requested: String },

    /// The negotiated frame size is below the AMQP minimum.
    #[snafu(display("requested frame max is too small (min = {}, requested = {})", min, requested))]
    FrameMaxTooSmall { min: u32, requested: u32 },

    /// SASL mechanisms requiring a secure/secure-ok exchange are not supported.
    #[snafu(display("SASL secure/secure-ok exchanges are not supported"))]
    SaslSecureNotSupported,

    /// The server refused the supplied credentials.
    #[snafu(display("authentication failed for user {}", username))]
    InvalidCredentials { username: String },

    /// Login was attempted on a connection that is already logged in.
    #[snafu(display("connection is already authenticated"))]
    AlreadyAuthenticated,

    /// An operation requiring a logged-in session was attempted before login.
    #[snafu(display("session is not authenticated"))]
    NotAuthenticated,

    /// The server stopped sending heartbeats.
    #[snafu(display("missed heartbeats from server"))]
    MissedServerHeartbeats,

    /// The server closed the connection.
    #[snafu(display("server closed connection (code={} message={})", code, text))]
    ServerClosedConnection { code: u16, text: String },

    /// The connection was closed by this client (or the owning session is gone).
    #[snafu(display("connection has been closed"))]
    ClientClosedConnection,

    /// The server closed a channel in response to an operation.
    #[snafu(display("server closed channel {} (code={}, message={})", channel_id, code, text))]
    ServerClosedChannel {
        channel_id: u16,
        code: u16,
        text: String,
    },

    /// The channel is not open.
    #[snafu(display("channel {} is not open", channel_id))]
    ChannelNotOpen { channel_id: u16 },

    /// No more channel numbers are available on this session.
    #[snafu(display("no more channel ids are available"))]
    ExhaustedChannelIds,

    /// The server rejected an exchange or queue declaration.
    #[snafu(display("declare of {} rejected (code={}, message={})", name, code, text))]
    DeclareRejected { name: String, code: u16, text: String },

    /// The server rejected a queue binding.
    #[snafu(display(
        "bind of queue {} to exchange {} rejected (code={}, message={})",
        queue,
        exchange,
        code,
        text
    ))]
    BindRejected {
        queue: String,
        exchange: String,
        code: u16,
        text: String,
    },

    /// The server rejected a publish.
    #[snafu(display("publish to exchange {} rejected (code={}, message={})", exchange, code, text))]
    PublishRejected {
        exchange: String,
        code: u16,
        text: String,
    },

    /// The server rejected a consume or cancel request.
    #[snafu(display("consume from queue {} rejected (code={}, message={})", queue, code, text))]
    ConsumeRejected { queue: String, code: u16, text: String },

    /// The consumer's channel or connection went away while waiting for a delivery.
    #[snafu(display("delivery wait on channel {} interrupted: {}", channel_id, source))]
    DeliveryInterrupted { channel_id: u16, source: Box<Error> },

    /// The server cancelled the consumer, e.g. because its queue was deleted.
    #[snafu(display("consumer {} on channel {} was cancelled by the server", consumer_tag, channel_id))]
    ConsumerCancelled { channel_id: u16, consumer_tag: String },

    /// The consumer tag is not known on this channel.
    #[snafu(display("unknown consumer tag {} on channel {}", consumer_tag, channel_id))]
    UnknownConsumerTag { channel_id: u16, consumer_tag: String },

    /// An externally supplied field table is malformed.
    #[snafu(display("malformed field table: {}", reason))]
    MalformedTable { reason: String },

    /// A field table value has a kind this crate does not decode.
    #[snafu(display("unsupported field table value kind {:?}", *kind as char))]
    UnsupportedFieldKind { kind: u8 },

    /// A field table key is longer than a short string allows.
    #[snafu(display("field table key is longer than 255 bytes: {}", key))]
    FieldKeyTooLong { key: String },

    /// A field table value is longer than a long string allows.
    #[snafu(display("field table value for {} is longer than 4 GiB", key))]
    FieldValueTooLong { key: String },

    /// The encoded field table would not fit its 32-bit length prefix.
    #[snafu(display("field table is larger than 4 GiB"))]
    FieldTableTooLarge,

    /// A name is longer than a short string allows.
    #[snafu(display("{} is longer than 255 bytes", name))]
    NameTooLong { name: String },

    /// The exchange type on the wire is not one of direct/fanout/topic/headers.
    #[snafu(display("unknown exchange type {}", type_))]
    UnknownExchangeType { type_: String },
}

/// The broad kind of an [`Error`], independent of the operation details it carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectFailure,
    AuthFailure,
    DeclareRejected,
    BindRejected,
    PublishRejected,
    ConsumeRejected,
    DeliveryInterrupted,
    MalformedTable,
    ChannelClosed,
    ConnectionClosed,
    Protocol,
    InvalidArgument,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            Connect { .. } | ResolveHost { .. } | ParseUrl { .. } | InvalidUrl { .. } => {
                ErrorKind::ConnectFailure
            }
            InvalidCredentials { .. }
            | AlreadyAuthenticated
            | NotAuthenticated
            | UnsupportedAuthMechanism { .. }
            | SaslSecureNotSupported => ErrorKind::AuthFailure,
            DeclareRejected { .. } => ErrorKind::DeclareRejected,
            BindRejected { .. } => ErrorKind::BindRejected,
            PublishRejected { .. } => ErrorKind::PublishRejected,
            ConsumeRejected { .. } | UnknownConsumerTag { .. } | ConsumerCancelled { .. } => {
                ErrorKind::ConsumeRejected
            }
            DeliveryInterrupted { .. } => ErrorKind::DeliveryInterrupted,
            MalformedTable { .. } | UnsupportedFieldKind { .. } => ErrorKind::MalformedTable,
            ServerClosedChannel { .. } | ChannelNotOpen { .. } | ExhaustedChannelIds => {
                ErrorKind::ChannelClosed
            }
            Io { .. }
            | UnexpectedSocketClose
            | MissedServerHeartbeats
            | ServerClosedConnection { .. }
            | ClientClosedConnection => ErrorKind::ConnectionClosed,
            MalformedFrame
            | InternalSerialization
            | UnsupportedProtocol
            | FrameUnexpected
            | UnsupportedLocale { .. }
            | FrameMaxTooSmall { .. } => ErrorKind::Protocol,
            FieldKeyTooLong { .. }
            | FieldValueTooLong { .. }
            | FieldTableTooLarge
            | NameTooLong { .. }
            | UnknownExchangeType { .. } => ErrorKind::InvalidArgument,
        }
    }

    /// The AMQP reply code the server attached to this failure, if any.
    pub fn reply_code(&self) -> Option<u16> {
        use Error::*;
        match self {
            ServerClosedConnection { code, .. }
            | ServerClosedChannel { code, .. }
            | DeclareRejected { code, .. }
            | BindRejected { code, .. }
            | PublishRejected { code, .. }
            | ConsumeRejected { code, .. } => Some(*code),
            DeliveryInterrupted { source, .. } => source.reply_code(),
            _ => None,
        }
    }

    // Server-side channel closes are re-tagged with the operation that caused them.
    pub(crate) fn or_rejected<F>(self, f: F) -> Error
    where
        F: FnOnce(u16, String) -> Error,
    {
        match self {
            Error::ServerClosedChannel { code, text, .. } => f(code, text),
            other => other,
        }
    }

    // True if this failure means the channel it happened on is no longer usable.
    pub(crate) fn closes_channel(&self) -> bool {
        use Error::*;
        matches!(
            self,
            ServerClosedChannel { .. }
                | DeclareRejected { .. }
                | BindRejected { .. }
                | PublishRejected { .. }
                | ConsumeRejected { .. }
        )
    }

    // True if this failure means the whole connection is gone.
    pub(crate) fn closes_connection(&self) -> bool {
        use Error::*;
        matches!(
            self,
            Io { .. }
                | UnexpectedSocketClose
                | MissedServerHeartbeats
                | ServerClosedConnection { .. }
                | ClientClosedConnection
                | MalformedFrame
                | FrameUnexpected
        )
    }
}
