use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    config::{ConfigError, OverflowPolicy, ServerConfig},
    content::{ContentMap, ContentMapError, ContentStore, LookupError},
    pool::{PoolError, QueueError, WorkerPool},
};

use super::{
    ProtocolTransport, Request, ResponseHeader, Status,
    transport::{HeaderAccumulator, TransportError},
};

/// Body bytes read from the content source per send.
pub const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Content(#[from] ContentMapError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Receives every valid request the accept loop reads.
///
/// The handler owns `connection` from here on and closes it by dropping it.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, connection: TcpStream, path: String);
}

/// Answers one request from a [`ContentStore`].
pub struct ServerEngine<C> {
    store: C,
}

impl<C: ContentStore> ServerEngine<C> {
    pub fn new(store: C) -> Self {
        Self { store }
    }

    /// Writes the response for `path` to `stream`: a header, and for `OK` the
    /// whole content.
    ///
    /// An error means the connection should be abandoned; the peer will see a
    /// truncated body.
    pub fn respond<S: Write>(&self, stream: S, path: &str) -> Result<Status, TransportError> {
        let mut transport = ProtocolTransport::new(stream);

        let mut content = match self.store.lookup(path) {
            Ok(content) => content,
            Err(LookupError::NotFound(_)) => {
                debug!("{path}: not found");
                transport.write_response(&ResponseHeader::FileNotFound)?;
                return Ok(Status::FileNotFound);
            }
            Err(e) => {
                warn!("{e}");
                transport.write_response(&ResponseHeader::Error)?;
                return Ok(Status::Error);
            }
        };

        transport.write_response(&ResponseHeader::Ok {
            content_length: content.size,
        })?;

        let mut buf = [0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        while sent < content.size {
            let want = (content.size - sent).min(CHUNK_SIZE as u64) as usize;
            let n = match content.source.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("content ended after {sent} of {} bytes", content.size),
                    )));
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            transport.write_body(&buf[..n])?;
            sent += n as u64;
        }

        Ok(Status::Ok)
    }
}

impl<C: ContentStore> Handler for ServerEngine<C> {
    fn handle(&self, mut connection: TcpStream, path: String) {
        match self.respond(&mut connection, &path) {
            Ok(status) => debug!("{path}: answered {status}"),
            Err(e) => warn!("{path}: abandoned connection: {e}"),
        }
    }
}

/// A connection waiting for a server worker.
#[derive(Debug)]
pub struct WorkItem {
    pub connection: TcpStream,
    pub path: String,
}

/// Hands requests to a pool of workers running a [`ServerEngine`].
pub struct PooledHandler<C: ContentStore> {
    pool: WorkerPool<WorkItem>,
    overflow: OverflowPolicy,
    _store: std::marker::PhantomData<fn() -> C>,
}

impl<C: ContentStore> PooledHandler<C> {
    pub fn new(
        engine: ServerEngine<C>,
        threads: usize,
        capacity: Option<usize>,
        overflow: OverflowPolicy,
    ) -> Result<Self, PoolError> {
        let pool = WorkerPool::new(threads, capacity, move |_, item: WorkItem| {
            engine.handle(item.connection, item.path)
        })?;

        Ok(Self {
            pool,
            overflow,
            _store: std::marker::PhantomData,
        })
    }

    pub fn pool(&self) -> &WorkerPool<WorkItem> {
        &self.pool
    }
}

impl<C: ContentStore> Handler for PooledHandler<C> {
    fn handle(&self, connection: TcpStream, path: String) {
        let item = WorkItem { connection, path };
        let queued = match self.overflow {
            OverflowPolicy::Block => self.pool.submit(item),
            OverflowPolicy::Reject => self.pool.try_submit(item),
        };

        if let Err(e) = queued {
            let reason = match e {
                QueueError::Full(_) => "queue full",
                QueueError::Closed(_) => "pool shut down",
            };
            let WorkItem {
                mut connection,
                path,
            } = e.into_inner();

            warn!("{path}: {reason}, answering {}", Status::Error);
            if let Err(e) = ProtocolTransport::new(&mut connection).write_response(&ResponseHeader::Error)
            {
                debug!("{path}: {e}");
            }
        }
    }
}

/// Accepts connections, reads one request from each and passes valid ones to
/// a [`Handler`].
pub struct GetFileServer<H> {
    listener: TcpListener,
    handler: H,
    request_timeout: Option<Duration>,
}

impl GetFileServer<PooledHandler<ContentMap>> {
    /// Builds the pooled server described by `config`, listening on every
    /// interface.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let store = ContentMap::load(&config.content_map)?.with_delay(config.content_delay);
        let handler = PooledHandler::new(
            ServerEngine::new(store),
            config.threads,
            config.queue_capacity,
            config.overflow,
        )?;

        let server = GetFileServer::bind(SocketAddr::from(([0, 0, 0, 0], config.port)), handler)?
            .with_request_timeout(config.request_timeout);
        Ok(server)
    }
}

impl<H: Handler> GetFileServer<H> {
    pub fn bind(address: impl ToSocketAddrs, handler: H) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)?;
        Ok(Self {
            listener,
            handler,
            request_timeout: None,
        })
    }

    /// Give up on clients that do not finish their request in time.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Runs the accept loop. Only returns if the listener itself fails.
    pub fn listen(self) -> Result<(), TransportError> {
        info!("listening at {}", self.local_addr()?);

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => self.accept(stream),
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }

    fn accept(&self, mut stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());

        let mut acc = HeaderAccumulator::<Request>::new();
        let read = match self.request_timeout {
            Some(timeout) => acc.read_by(&mut stream, Instant::now() + timeout),
            None => acc.read_from(&mut stream),
        };
        match read {
            Ok((request, _)) => {
                debug!("{peer} requested {}", request.path());
                self.handler.handle(stream, request.into_path());
            }
            // A partial header followed by EOF or a timeout is as malformed as a bad one.
            Err(e) if e.is_malformed() || acc.buffered() > 0 => {
                debug!("{peer}: invalid request: {e}");
                if let Err(e) =
                    ProtocolTransport::new(&mut stream).write_response(&ResponseHeader::Invalid)
                {
                    debug!("{peer}: {e}");
                }
            }
            Err(e) => debug!("{peer}: dropped before sending a request: {e}"),
        }
    }
}
