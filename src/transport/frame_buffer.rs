use super::serialize;
use crate::errors::*;
use amq_protocol::frame::AMQPFrame;
use bytes::{Buf, BytesMut};
use log::trace;
use snafu::ResultExt;
use std::io;
use std::marker::PhantomData;

const MIN_READ: usize = 4096;

pub(crate) struct FrameBuffer(Inner<AmqpFrameKind>);

impl FrameBuffer {
    pub(crate) fn new() -> FrameBuffer {
        FrameBuffer(Inner::new())
    }

    // Hand every complete frame to handler, reading until the stream would block
    // (or its read timeout expires). Returns the number of bytes read.
    pub(crate) fn read_from<S, F>(&mut self, stream: &mut S, handler: F) -> Result<usize>
    where
        S: io::Read,
        F: FnMut(AMQPFrame) -> Result<()>,
    {
        self.0.read_from(stream, handler)
    }
}

trait FrameKind {
    type Frame;

    // None until enough bytes are buffered to know the size of the next frame.
    fn parse_size(buf: &[u8]) -> Option<usize>;

    // Only called with exactly the number of bytes parse_size() asked for.
    fn parse_frame(buf: &[u8]) -> Result<Self::Frame>;
}

enum AmqpFrameKind {}

impl FrameKind for AmqpFrameKind {
    type Frame = AMQPFrame;

    fn parse_size(buf: &[u8]) -> Option<usize> {
        serialize::parse_size(buf)
    }

    fn parse_frame(buf: &[u8]) -> Result<AMQPFrame> {
        serialize::parse(buf)
    }
}

struct Inner<Kind: FrameKind> {
    buf: BytesMut,
    phantom: PhantomData<Kind>,
}

impl<Kind: FrameKind> Inner<Kind> {
    fn new() -> Inner<Kind> {
        Inner {
            buf: BytesMut::with_capacity(MIN_READ),
            phantom: PhantomData,
        }
    }

    fn read_from<S, F>(&mut self, stream: &mut S, mut handler: F) -> Result<usize>
    where
        S: io::Read,
        F: FnMut(Kind::Frame) -> Result<()>,
    {
        let mut bytes_read = 0;

        loop {
            let mut reserve = MIN_READ;
            if let Some(frame_size) = Kind::parse_size(&self.buf) {
                if self.buf.len() >= frame_size {
                    let frame = Kind::parse_frame(&self.buf[..frame_size])?;
                    self.buf.advance(frame_size);
                    handler(frame)?;
                    continue;
                }
                reserve = usize::max(MIN_READ, frame_size - self.buf.len());
            }

            let filled = self.buf.len();
            self.buf.resize(filled + reserve, 0);
            let res = stream.read(&mut self.buf[filled..]);
            self.buf.truncate(filled + *res.as_ref().unwrap_or(&0));

            match res {
                Ok(0) => return UnexpectedSocketCloseSnafu.fail(),
                Ok(n) => {
                    trace!("read {} bytes", n);
                    bytes_read += n;
                }
                Err(err) => match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => return Ok(bytes_read),
                    io::ErrorKind::Interrupted => (),
                    _ => return Err(err).context(IoSnafu),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::serialize::OutputBuffer;
    use amq_protocol::protocol::channel::{AMQPMethod as AmqpChannel, OpenOk};
    use amq_protocol::protocol::AMQPClass;
    use mockstream::FailingMockStream;
    use std::io::{Cursor, Read};

    struct FakeFrameKind {}

    impl FrameKind for FakeFrameKind {
        type Frame = Vec<u8>;

        fn parse_size(buf: &[u8]) -> Option<usize> {
            if buf.len() >= 2 {
                Some(buf[1] as usize)
            } else {
                None
            }
        }

        fn parse_frame(buf: &[u8]) -> Result<Self::Frame> {
            assert!(buf.len() == buf[1] as usize);
            if buf.len() == 6 && &buf[2..] == b"fail" {
                MalformedFrameSnafu.fail()
            } else {
                Ok(Vec::from(buf))
            }
        }
    }

    fn make_buffer() -> Inner<FakeFrameKind> {
        Inner::new()
    }

    fn would_block() -> FailingMockStream {
        FailingMockStream::new(io::ErrorKind::WouldBlock, "", 1)
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut c = Read::chain(Cursor::new(b"a\x04aab\x04bb"), would_block());

        let mut got = Vec::new();
        let mut buf = make_buffer();
        let n = buf
            .read_from(&mut c, |f| {
                got.push(f);
                Ok(())
            })
            .unwrap();

        assert_eq!(n, 8);
        assert_eq!(got, vec![b"a\x04aa".to_vec(), b"b\x04bb".to_vec()]);
    }

    #[test]
    fn frames_split_across_reads() {
        let mut c = Read::chain(Cursor::new(b"a\x04"), would_block())
            .chain(Cursor::new(b"aab\x04b"))
            .chain(would_block())
            .chain(Cursor::new(b"b"))
            .chain(would_block());

        let mut got = Vec::new();
        let mut buf = make_buffer();
        let mut push = |f: Vec<u8>| -> Result<()> {
            got.push(f);
            Ok(())
        };
        assert_eq!(buf.read_from(&mut c, &mut push).unwrap(), 2);
        assert_eq!(buf.read_from(&mut c, &mut push).unwrap(), 5);
        assert_eq!(buf.read_from(&mut c, &mut push).unwrap(), 1);
        drop(push);
        assert_eq!(got, vec![b"a\x04aa".to_vec(), b"b\x04bb".to_vec()]);
    }

    #[test]
    fn timed_out_read_returns() {
        let mut c = Read::chain(Cursor::new(b"a\x04"), FailingMockStream::new(
            io::ErrorKind::TimedOut,
            "",
            1,
        ));
        let mut buf = make_buffer();
        let n = buf.read_from(&mut c, |_| panic!("no full frame")).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn parse_fail() {
        let mut c = Read::chain(Cursor::new(b"x\x06fail"), would_block());

        let mut buf = make_buffer();
        let res = buf.read_from(&mut c, |_| panic!("should not be called"));
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn handler_fail() {
        let mut c = Read::chain(Cursor::new(b"a\x04aa"), would_block());

        let mut buf = make_buffer();
        let res = buf.read_from(&mut c, |_| NotAuthenticatedSnafu.fail());
        match res.unwrap_err() {
            Error::NotAuthenticated => (),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn eof_fail() {
        let mut c = Cursor::new(b"a\x04a");

        let mut buf = make_buffer();
        let res = buf.read_from(&mut c, |_| panic!("should not be called"));
        match res.unwrap_err() {
            Error::UnexpectedSocketClose => (),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn io_fail() {
        let mut c = Read::chain(Cursor::new(b"a\x04a"), FailingMockStream::new(
            io::ErrorKind::ConnectionReset,
            "",
            1,
        ));

        let mut buf = make_buffer();
        let res = buf.read_from(&mut c, |_| panic!("should not be called"));
        match res.unwrap_err() {
            Error::Io { .. } => (),
            err => panic!("unexpected error {}", err),
        }
    }

    #[test]
    fn amqp_frames() {
        let mut out = OutputBuffer::empty();
        out.push_method(
            1,
            AmqpChannel::OpenOk(OpenOk {
                channel_id: String::new(),
            }),
        )
        .unwrap();
        out.push_heartbeat().unwrap();
        let mut c = Read::chain(Cursor::new(out.into_bytes()), would_block());

        let mut got = Vec::new();
        let mut buf = FrameBuffer::new();
        buf.read_from(&mut c, |f| {
            got.push(f);
            Ok(())
        })
        .unwrap();
        assert_eq!(got.len(), 2);
        assert!(matches!(
            got[0],
            AMQPFrame::Method(1, AMQPClass::Channel(AmqpChannel::OpenOk(_)))
        ));
        assert!(matches!(got[1], AMQPFrame::Heartbeat(0)));
    }
}
