use std::{
    io::{self, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use log::{debug, trace, warn};

use super::{
    ProtocolTransport, ResponseHeader, Status,
    transport::{READ_CHUNK, TransportError},
};

/// What a single GETFILE exchange produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub status: Status,
    /// Body bytes handed to the sink.
    pub bytes_received: u64,
    /// Length announced by an `OK` header.
    pub content_length: Option<u64>,
}

impl TransferOutcome {
    /// `OK` with every announced byte delivered.
    pub fn is_complete(&self) -> bool {
        self.status == Status::Ok && self.content_length == Some(self.bytes_received)
    }
}

/// Issues GETFILE requests against one server.
///
/// The client holds no connection; every [`get`](Self::get) opens its own, so a
/// single client can be shared by any number of threads.
#[derive(Debug, Clone)]
pub struct GetFileClient {
    server: String,
    port: u16,
    timeout: Option<Duration>,
}

impl GetFileClient {
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            timeout: None,
        }
    }

    /// Connect, read and write timeout for every request.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Fetches `path`, writing the body to `sink` as it arrives.
    ///
    /// Failures are folded into the returned status: transport problems give
    /// `ERROR`, an unreadable response header gives `INVALID`. A body cut short
    /// by the server is reported as `ERROR` with `bytes_received` below
    /// `content_length`.
    pub fn get<W: Write + ?Sized>(&self, path: &str, sink: &mut W) -> TransferOutcome {
        ClientSession {
            client: self,
            path,
            content_length: None,
            bytes_received: 0,
        }
        .run(sink)
    }

    fn connect(&self) -> Result<TcpStream, TransportError> {
        let addrs = (self.server.as_str(), self.port).to_socket_addrs()?;

        let mut last_err = None;
        for addr in addrs {
            let stream = match self.timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match stream {
                Ok(stream) => {
                    stream.set_read_timeout(self.timeout)?;
                    stream.set_write_timeout(self.timeout)?;
                    return Ok(stream);
                }
                Err(e) => {
                    trace!("connect to {addr} failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address found for {}", self.server),
                )
            })
            .into())
    }
}

enum TransferState {
    Connecting,
    SendingRequest(ProtocolTransport<TcpStream>),
    AwaitingHeader(ProtocolTransport<TcpStream>),
    StreamingBody {
        transport: ProtocolTransport<TcpStream>,
        content_length: u64,
        initial: Vec<u8>,
    },
    Done(Status),
}

/// One request in flight. Lives on the calling thread only.
struct ClientSession<'a> {
    client: &'a GetFileClient,
    path: &'a str,
    content_length: Option<u64>,
    bytes_received: u64,
}

impl ClientSession<'_> {
    fn run<W: Write + ?Sized>(mut self, sink: &mut W) -> TransferOutcome {
        let mut state = TransferState::Connecting;
        loop {
            state = match state {
                TransferState::Connecting => self.connect(),
                TransferState::SendingRequest(transport) => self.send_request(transport),
                TransferState::AwaitingHeader(transport) => self.await_header(transport),
                TransferState::StreamingBody {
                    transport,
                    content_length,
                    initial,
                } => self.stream_body(transport, content_length, &initial, sink),
                TransferState::Done(status) => {
                    debug!(
                        "{}: {status}, {} of {:?} bytes",
                        self.path, self.bytes_received, self.content_length
                    );
                    return TransferOutcome {
                        status,
                        bytes_received: self.bytes_received,
                        content_length: self.content_length,
                    };
                }
            };
        }
    }

    fn connect(&mut self) -> TransferState {
        match self.client.connect() {
            Ok(stream) => TransferState::SendingRequest(ProtocolTransport::new(stream)),
            Err(e) => {
                warn!(
                    "failed to connect to {}:{}: {e}",
                    self.client.server, self.client.port
                );
                TransferState::Done(Status::Error)
            }
        }
    }

    fn send_request(&mut self, mut transport: ProtocolTransport<TcpStream>) -> TransferState {
        match transport.write_request(self.path) {
            Ok(()) => TransferState::AwaitingHeader(transport),
            Err(e) => {
                warn!("{}: failed to send request: {e}", self.path);
                TransferState::Done(Status::Error)
            }
        }
    }

    fn await_header(&mut self, mut transport: ProtocolTransport<TcpStream>) -> TransferState {
        match transport.read_response() {
            Ok((ResponseHeader::Ok { content_length }, initial)) => {
                self.content_length = Some(content_length);
                TransferState::StreamingBody {
                    transport,
                    content_length,
                    initial,
                }
            }
            Ok((header, _)) => TransferState::Done(header.status()),
            Err(e) if e.is_malformed() => {
                warn!("{}: {e}", self.path);
                TransferState::Done(Status::Invalid)
            }
            Err(e) => {
                warn!("{}: no response header: {e}", self.path);
                TransferState::Done(Status::Error)
            }
        }
    }

    fn stream_body<W: Write + ?Sized>(
        &mut self,
        mut transport: ProtocolTransport<TcpStream>,
        content_length: u64,
        initial: &[u8],
        sink: &mut W,
    ) -> TransferState {
        if let Err(e) = self.deliver(sink, initial, content_length) {
            warn!("{}: sink rejected body: {e}", self.path);
            return TransferState::Done(Status::Error);
        }

        let mut buf = [0u8; READ_CHUNK * 8];
        while self.bytes_received < content_length {
            let n = match transport.read_body(&mut buf) {
                Ok(0) => {
                    warn!(
                        "{}: server closed after {} of {content_length} bytes",
                        self.path, self.bytes_received
                    );
                    return TransferState::Done(Status::Error);
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("{}: body read failed: {e}", self.path);
                    return TransferState::Done(Status::Error);
                }
            };

            if let Err(e) = self.deliver(sink, &buf[..n], content_length) {
                warn!("{}: sink rejected body: {e}", self.path);
                return TransferState::Done(Status::Error);
            }
        }

        TransferState::Done(Status::Ok)
    }

    /// Forwards `chunk` to the sink, dropping anything past `content_length`.
    fn deliver<W: Write + ?Sized>(
        &mut self,
        sink: &mut W,
        chunk: &[u8],
        content_length: u64,
    ) -> io::Result<()> {
        let remaining = content_length - self.bytes_received;
        let take = chunk.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        if take < chunk.len() {
            debug!(
                "{}: discarding {} bytes past the declared length",
                self.path,
                chunk.len() - take
            );
        }
        if take == 0 {
            return Ok(());
        }

        sink.write_all(&chunk[..take])?;
        self.bytes_received += take as u64;
        Ok(())
    }
}
