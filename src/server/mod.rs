//! Transport seam. Sockets, TLS and the event loop live outside this crate;
//! they hand complete messages to [`crate::dispatcher::ConnectionDispatcher`]
//! and receive bytes back through a [`Connection`].

mod connection;

pub use connection::{Connection, MemoryConnection, StreamConnection};
