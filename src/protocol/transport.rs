use std::{
    io::{self, Read, Write},
    marker::PhantomData,
    mem,
    net::TcpStream,
    time::Instant,
};

use log::{debug, trace};
use thiserror::Error;

use super::codec::{
    self, Frame, ProtocolError, Request, ResponseHeader, encode_request, encode_response_header,
};

/// Largest header accepted before the terminator shows up.
pub const MAX_HEADER_LEN: usize = 1024;
/// Size of a single socket read.
pub const READ_CHUNK: usize = 512;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed header: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("peer closed the connection after {buffered} header bytes")]
    Closed { buffered: usize },
    #[error("header exceeds {limit} bytes without a terminator")]
    HeaderTooLarge { limit: usize },
    #[error("short send: {sent} of {expected} bytes")]
    ShortSend { sent: usize, expected: usize },
}

impl TransportError {
    /// Whether the peer sent something that is not a GETFILE header.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            TransportError::Protocol(_) | TransportError::HeaderTooLarge { .. }
        )
    }
}

/// Writes `bytes` until all of them are accepted or the writer fails.
///
/// Returns how many bytes were written. A count lower than `bytes.len()` means
/// the writer reported an error or stopped accepting data.
pub fn send_all<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> usize {
    let mut sent = 0;
    while sent < bytes.len() {
        match writer.write(&bytes[sent..]) {
            Ok(0) => {
                debug!("writer accepted no bytes after {sent} of {}", bytes.len());
                break;
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("send failed after {sent} of {} bytes: {e}", bytes.len());
                break;
            }
        }
    }
    sent
}

/// [`send_all`], with a short send reported as an error.
pub fn send_exact<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> Result<(), TransportError> {
    let sent = send_all(writer, bytes);
    if sent < bytes.len() {
        return Err(TransportError::ShortSend {
            sent,
            expected: bytes.len(),
        });
    }
    Ok(())
}

/// A header type that can be recognized incrementally.
pub trait Header: Sized {
    fn parse(bytes: &[u8]) -> Result<Frame<Self>, ProtocolError>;
}

impl Header for Request {
    fn parse(bytes: &[u8]) -> Result<Frame<Self>, ProtocolError> {
        codec::parse_request(bytes)
    }
}

impl Header for ResponseHeader {
    fn parse(bytes: &[u8]) -> Result<Frame<Self>, ProtocolError> {
        codec::decode_response_header(bytes)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Accumulated<H> {
    Pending,
    /// `body` holds the bytes that followed the terminator in the reads so far.
    Ready { header: H, body: Vec<u8> },
}

/// Collects raw reads until a full header has arrived.
///
/// The buffered bytes are never rewritten in place; once the header resolves,
/// whatever followed the terminator is handed back as the start of the body.
#[derive(Debug)]
pub struct HeaderAccumulator<H> {
    buffer: Vec<u8>,
    limit: usize,
    _header: PhantomData<H>,
}

impl<H: Header> Default for HeaderAccumulator<H> {
    fn default() -> Self {
        Self::with_limit(MAX_HEADER_LEN)
    }
}

impl<H: Header> HeaderAccumulator<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK),
            limit,
            _header: PhantomData,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends one read and checks the cumulative buffer for a header.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Accumulated<H>, TransportError> {
        self.buffer.extend_from_slice(chunk);
        trace!("accumulated {} header bytes", self.buffer.len());

        match H::parse(&self.buffer)? {
            Frame::Complete { value, consumed } => {
                let mut buffer = mem::take(&mut self.buffer);
                let body = buffer.split_off(consumed);
                Ok(Accumulated::Ready {
                    header: value,
                    body,
                })
            }
            Frame::Incomplete if self.buffer.len() > self.limit => {
                Err(TransportError::HeaderTooLarge { limit: self.limit })
            }
            Frame::Incomplete => Ok(Accumulated::Pending),
        }
    }

    /// Reads from `reader` until the header resolves.
    pub fn read_from<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Result<(H, Vec<u8>), TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(ready) = self.read_chunk(reader, &mut chunk)? {
                return Ok(ready);
            }
        }
    }

    /// Like [`read_from`](Self::read_from), but gives up with an I/O error
    /// once `deadline` passes, however the peer spaces out its bytes.
    pub fn read_by(
        &mut self,
        stream: &mut TcpStream,
        deadline: Instant,
    ) -> Result<(H, Vec<u8>), TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no complete header after {} bytes", self.buffer.len()),
                )));
            }
            stream.set_read_timeout(Some(remaining))?;

            if let Some(ready) = self.read_chunk(stream, &mut chunk)? {
                return Ok(ready);
            }
        }
    }

    fn read_chunk<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
        chunk: &mut [u8],
    ) -> Result<Option<(H, Vec<u8>)>, TransportError> {
        let n = match reader.read(chunk) {
            Ok(0) => {
                return Err(TransportError::Closed {
                    buffered: self.buffer.len(),
                });
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match self.feed(&chunk[..n])? {
            Accumulated::Ready { header, body } => Ok(Some((header, body))),
            Accumulated::Pending => Ok(None),
        }
    }
}

/// GETFILE framing over a byte stream.
pub struct ProtocolTransport<T> {
    stream: T,
}

impl<T> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }
}

impl<T: Write> ProtocolTransport<T> {
    pub fn write_request(&mut self, path: &str) -> Result<(), TransportError> {
        send_exact(&mut self.stream, &encode_request(path))
    }

    pub fn write_response(&mut self, header: &ResponseHeader) -> Result<(), TransportError> {
        send_exact(&mut self.stream, &encode_response_header(header))
    }

    pub fn write_body(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        send_exact(&mut self.stream, chunk)
    }
}

impl<T: Read> ProtocolTransport<T> {
    /// Reads a single request. Anything the peer sent after it is discarded.
    pub fn read_request(&mut self) -> Result<Request, TransportError> {
        let (req, trailing) = HeaderAccumulator::<Request>::new().read_from(&mut self.stream)?;
        if !trailing.is_empty() {
            debug!("ignoring {} bytes after request", trailing.len());
        }
        Ok(req)
    }

    /// Reads a response header, returning it with any body bytes that arrived
    /// alongside it.
    pub fn read_response(&mut self) -> Result<(ResponseHeader, Vec<u8>), TransportError> {
        HeaderAccumulator::<ResponseHeader>::new().read_from(&mut self.stream)
    }

    pub fn read_body(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            match self.stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Cursor, Seek},
        net::TcpListener,
        thread,
        time::Duration,
    };

    use super::*;

    /// Reader handing out at most `step` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// Writer accepting at most `step` bytes per call, failing after `budget`.
    struct Choked {
        written: Vec<u8>,
        step: usize,
        budget: usize,
    }

    impl Write for Choked {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written.len() >= self.budget {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            let n = self
                .step
                .min(buf.len())
                .min(self.budget - self.written.len());
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn response_bytes(body: &[u8]) -> Vec<u8> {
        let mut bytes = encode_response_header(&ResponseHeader::Ok {
            content_length: body.len() as u64,
        });
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn read_write_request() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);

        transport.write_request("/a.txt").unwrap();
        transport.stream.seek(std::io::SeekFrom::Start(0)).unwrap();
        let req = transport.read_request().unwrap();
        assert_eq!(req, Request::new("/a.txt"));
    }

    #[test]
    fn read_write_response() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);

        transport
            .write_response(&ResponseHeader::Ok { content_length: 3 })
            .unwrap();
        transport.write_body(b"abc").unwrap();
        transport.stream.seek(std::io::SeekFrom::Start(0)).unwrap();

        let (header, body) = transport.read_response().unwrap();
        assert_eq!(header, ResponseHeader::Ok { content_length: 3 });
        assert_eq!(body, b"abc");
    }

    #[test]
    fn send_all_survives_partial_writes() {
        let mut writer = Choked {
            written: Vec::new(),
            step: 3,
            budget: usize::MAX,
        };

        let sent = send_all(&mut writer, b"GETFILE GET /a\r\n\r\n");
        assert_eq!(sent, 18);
        assert_eq!(writer.written, b"GETFILE GET /a\r\n\r\n");
    }

    #[test]
    fn send_all_reports_short_count() {
        let mut writer = Choked {
            written: Vec::new(),
            step: 4,
            budget: 10,
        };

        assert_eq!(send_all(&mut writer, &[7u8; 32]), 10);

        let mut writer = Choked {
            written: Vec::new(),
            step: 4,
            budget: 10,
        };
        let err = send_exact(&mut writer, &[7u8; 32]).unwrap_err();
        assert!(matches!(
            err,
            TransportError::ShortSend {
                sent: 10,
                expected: 32
            }
        ));
    }

    #[test]
    fn accumulator_fragmentation_invariance() {
        let body = (0..200u8).collect::<Vec<u8>>();
        let bytes = response_bytes(&body);

        let mut whole = HeaderAccumulator::<ResponseHeader>::new();
        let (header, initial) = whole
            .read_from(&mut Trickle {
                data: bytes.clone(),
                pos: 0,
                step: usize::MAX,
            })
            .unwrap();
        assert_eq!(header, ResponseHeader::Ok { content_length: 200 });
        assert_eq!(initial, body);

        let mut reader = Trickle {
            data: bytes,
            pos: 0,
            step: 1,
        };
        let mut fragmented = HeaderAccumulator::<ResponseHeader>::new();
        let (header_1, initial_1) = fragmented.read_from(&mut reader).unwrap();
        assert_eq!(header_1, header);
        assert!(initial_1.is_empty());

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, body);
    }

    #[test]
    fn accumulator_feed_byte_by_byte() {
        let bytes = response_bytes(b"payload");
        let header_len = bytes.len() - 7;
        let mut acc = HeaderAccumulator::<ResponseHeader>::new();

        for (i, b) in bytes[..header_len - 1].iter().enumerate() {
            assert_eq!(acc.feed(&[*b]).unwrap(), Accumulated::Pending, "byte {i}");
        }

        // The final terminator byte arrives together with the body.
        let res = acc.feed(&bytes[header_len - 1..]).unwrap();
        assert_eq!(
            res,
            Accumulated::Ready {
                header: ResponseHeader::Ok { content_length: 7 },
                body: b"payload".to_vec()
            }
        );
        assert_eq!(acc.buffered(), 0);
    }

    #[test]
    fn accumulator_rejects_malformed() {
        let mut acc = HeaderAccumulator::<Request>::new();
        assert_eq!(acc.feed(b"GETFILE POST").unwrap(), Accumulated::Pending);

        let err = acc.feed(b" /a\r\n\r\n").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn accumulator_header_limit() {
        let mut acc = HeaderAccumulator::<Request>::with_limit(16);
        assert_eq!(acc.feed(b"GETFILE GET /a").unwrap(), Accumulated::Pending);

        let err = acc.feed(b"aaaaaaaaaa").unwrap_err();
        assert!(matches!(err, TransportError::HeaderTooLarge { limit: 16 }));
    }

    #[test]
    fn accumulator_closed_before_header() {
        let mut acc = HeaderAccumulator::<ResponseHeader>::new();
        let err = acc.read_from(&mut &b"GETFILE OK 1"[..]).unwrap_err();
        assert!(matches!(err, TransportError::Closed { buffered: 12 }));
        assert!(!err.is_malformed());
    }

    #[test]
    fn accumulator_deadline_spans_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let trickler = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            for b in b"GETFILE GET /slow".iter().cycle().take(40) {
                if stream.write_all(&[*b]).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
        });

        let (mut stream, _) = listener.accept().unwrap();
        let started = Instant::now();
        let mut acc = HeaderAccumulator::<Request>::new();
        let err = acc
            .read_by(&mut stream, started + Duration::from_millis(300))
            .unwrap_err();

        assert!(matches!(err, TransportError::Io(_)), "{err}");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(acc.buffered() > 0);

        drop(stream);
        trickler.join().unwrap();
    }
}
