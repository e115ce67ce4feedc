use crate::errors::*;
use crate::FieldTable;
use amq_protocol::frame::generation::{
    gen_content_body_frame, gen_content_header_frame, gen_heartbeat_frame, gen_method_frame,
};
use amq_protocol::frame::{parse_frame, AMQPFrame};
use amq_protocol::protocol::basic::AMQPMethod as AmqpBasic;
use amq_protocol::protocol::basic::AMQPProperties;
use amq_protocol::protocol::channel::AMQPMethod as AmqpChannel;
use amq_protocol::protocol::connection::AMQPMethod as AmqpConnection;
use amq_protocol::protocol::exchange::AMQPMethod as AmqpExchange;
use amq_protocol::protocol::queue::AMQPMethod as AmqpQueue;
use amq_protocol::protocol::AMQPClass;
use amq_protocol::types::parsing::parse_long_uint;
use amq_protocol::types::{AMQPValue, FieldTable as AmqpFieldTable};
use cookie_factory::GenError;
use log::debug;
use std::result::Result as StdResult;

pub(crate) const PROTOCOL_HEADER: &[u8] = b"AMQP\x00\x00\x09\x01";

// frame type, channel, payload size, and the trailing frame-end octet
pub(crate) const FRAME_OVERHEAD: usize = 8;

// position (from start of frame) where the "size of frame" bytes are located
const FRAME_SIZE_POS: std::ops::Range<usize> = 3..7;

pub(crate) trait IntoAmqpClass {
    fn into_class(self) -> AMQPClass;
}

impl IntoAmqpClass for AmqpConnection {
    fn into_class(self) -> AMQPClass {
        AMQPClass::Connection(self)
    }
}

impl IntoAmqpClass for AmqpChannel {
    fn into_class(self) -> AMQPClass {
        AMQPClass::Channel(self)
    }
}

impl IntoAmqpClass for AmqpExchange {
    fn into_class(self) -> AMQPClass {
        AMQPClass::Exchange(self)
    }
}

impl IntoAmqpClass for AmqpQueue {
    fn into_class(self) -> AMQPClass {
        AMQPClass::Queue(self)
    }
}

impl IntoAmqpClass for AmqpBasic {
    fn into_class(self) -> AMQPClass {
        AMQPClass::Basic(self)
    }
}

/// Frames queued for a single write.
#[derive(Debug, Default)]
pub(crate) struct OutputBuffer(Vec<u8>);

impl OutputBuffer {
    pub(crate) fn empty() -> OutputBuffer {
        OutputBuffer(Vec::new())
    }

    pub(crate) fn push_heartbeat(&mut self) -> Result<()> {
        serialize(&mut self.0, |buf, pos| gen_heartbeat_frame((buf, pos)))
    }

    pub(crate) fn push_method<M>(&mut self, channel_id: u16, method: M) -> Result<()>
    where
        M: IntoAmqpClass,
    {
        let class = method.into_class();
        serialize(&mut self.0, |buf, pos| {
            gen_method_frame((buf, pos), channel_id, &class)
        })
    }

    pub(crate) fn push_content_header(
        &mut self,
        channel_id: u16,
        class_id: u16,
        length: usize,
        properties: &AMQPProperties,
    ) -> Result<()> {
        let length = length as u64;
        serialize(&mut self.0, |buf, pos| {
            gen_content_header_frame((buf, pos), channel_id, class_id, length, properties)
        })
    }

    pub(crate) fn push_content_body(&mut self, channel_id: u16, content: &[u8]) -> Result<()> {
        serialize(&mut self.0, |buf, pos| {
            gen_content_body_frame((buf, pos), channel_id, content)
        })
    }

    #[inline]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

fn serialize<F: Fn(&mut [u8], usize) -> StdResult<(&mut [u8], usize), GenError>>(
    buf: &mut Vec<u8>,
    f: F,
) -> Result<()> {
    let pos = buf.len();
    loop {
        let resize_to = match f(buf, pos) {
            Ok((_, end)) => {
                buf.truncate(end);
                return Ok(());
            }
            Err(GenError::BufferTooSmall(n)) => n,
            Err(_) => return InternalSerializationSnafu.fail(),
        };
        buf.resize(resize_to, 0);
    }
}

/// Bytes needed for the frame at the front of `buf`, or `None` if that is not known yet.
///
/// A server that does not speak 0-9-1 answers with its own 8-byte protocol header instead of a
/// frame; that is sized too, so [`parse`] can report it.
pub(crate) fn parse_size(buf: &[u8]) -> Option<usize> {
    if buf.first() == Some(&PROTOCOL_HEADER[0]) {
        return Some(PROTOCOL_HEADER.len());
    }
    if buf.len() < FRAME_SIZE_POS.end {
        return None;
    }
    // frame size excludes the 7 byte header and the frame-end octet
    parse_long_uint(&buf[FRAME_SIZE_POS])
        .ok()
        .map(|(_, size)| size as usize + FRAME_OVERHEAD)
}

/// Parse exactly one frame; `buf` must be the length [`parse_size`] asked for.
pub(crate) fn parse(buf: &[u8]) -> Result<AMQPFrame> {
    if buf.starts_with(&PROTOCOL_HEADER[..4]) {
        debug!("server answered with protocol header {:?}", buf);
        return UnsupportedProtocolSnafu.fail();
    }
    match parse_frame(buf) {
        Ok((rest, frame)) if rest.is_empty() => Ok(frame),
        _ => MalformedFrameSnafu.fail(),
    }
}

/// Names travel as AMQP short strings.
pub(crate) fn short_string<S: Into<String>>(name: S) -> Result<String> {
    let name = name.into();
    if name.len() > usize::from(u8::max_value()) {
        return NameTooLongSnafu { name }.fail();
    }
    Ok(name)
}

/// Wire form of a string table. Every value is sent as a long string.
pub(crate) fn amqp_table(table: &FieldTable) -> AmqpFieldTable {
    let mut out = AmqpFieldTable::new();
    for entry in table.entries() {
        out.insert(
            entry.key().to_string(),
            AMQPValue::LongString(entry.value().to_string()),
        );
    }
    out
}

/// The string entries of a received table; values of other kinds are skipped.
pub(crate) fn from_amqp_table(table: &AmqpFieldTable) -> Result<FieldTable> {
    let mut out = FieldTable::new();
    for (key, value) in table {
        match value {
            AMQPValue::LongString(value) => out.push(key, value)?,
            other => debug!("skipping field table entry {} ({:?})", key, other),
        }
    }
    Ok(out)
}
