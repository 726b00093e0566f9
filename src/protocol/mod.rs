//! The GETFILE protocol.
//!
//! GETFILE is a one-shot request/response protocol over TCP: the client opens a
//! connection, sends a single request naming a path, and the server answers
//! with a status header followed, on success, by exactly the announced number
//! of content bytes. The connection is closed after every exchange.
//!
//! # Overview
//!
//! The module is layered from pure encoding up to the two endpoints:
//!
//! - [`codec`]: header encoding and incremental decoding, no I/O.
//! - [`transport`]: [`send_all`] and [`HeaderAccumulator`], which recognize a
//!   header no matter how the stream splits it into reads, plus the
//!   [`ProtocolTransport`] wrapper built on them.
//! - [`GetFileClient`]: the client side of one exchange, streaming the body to
//!   any [`std::io::Write`] sink.
//! - [`GetFileServer`]: the accept loop, handing each valid request to a
//!   [`Handler`]; [`ServerEngine`] answers from a
//!   [`ContentStore`](crate::content::ContentStore) and [`PooledHandler`] runs
//!   it on a [`WorkerPool`](crate::pool::WorkerPool).
//!
//! # Wire Format
//!
//! Headers are ASCII and end with `\r\n\r\n`:
//!
//! - Request: `GETFILE GET <path>\r\n\r\n`
//! - `GETFILE OK <length>\r\n\r\n` followed by `<length>` bytes.
//! - `GETFILE FILE_NOT_FOUND \r\n\r\n`
//! - `GETFILE ERROR \r\n\r\n`
//! - `GETFILE INVALID\r\n\r\n`
//!
//! The `INVALID` header has no space before its terminator while the others
//! do. Clients accept either form.
//!
//! # See Also
//!
//! - [`pool`](crate::pool): The worker pools both endpoints run on.
pub mod codec;
pub mod transport;

mod client;
mod server;

pub use client::{GetFileClient, TransferOutcome};
pub use codec::{Request, ResponseHeader, Status};
pub use server::{
    CHUNK_SIZE, GetFileServer, Handler, PooledHandler, ServerEngine, ServerError, WorkItem,
};
pub use transport::{HeaderAccumulator, ProtocolTransport, TransportError, send_all};
