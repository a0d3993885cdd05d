use std::io::{self, Write};

/// Outbound side of a persistent connection.
///
/// The dispatcher calls exactly one of these per message.
pub trait Connection {
    /// Write `bytes` and keep the connection open.
    fn send(&mut self, bytes: Vec<u8>) -> io::Result<()>;

    /// Write `bytes`, then close.
    fn close(&mut self, bytes: Vec<u8>) -> io::Result<()>;
}

/// [`Connection`] over any writer.
///
/// Once closed, further writes fail with `BrokenPipe`.
#[derive(Debug)]
pub struct StreamConnection<W: Write> {
    stream: W,
    closed: bool,
}

impl<W: Write> StreamConnection<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_inner(self) -> W {
        self.stream
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection already closed",
            ));
        }
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }
}

impl<W: Write> Connection for StreamConnection<W> {
    fn send(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        self.write(&bytes)
    }

    fn close(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        let written = self.write(&bytes);
        self.closed = true;
        written
    }
}

/// Records what was sent. Handy for tests and for embedding the dispatcher
/// behind a transport that wants the bytes back.
#[derive(Debug, Default)]
pub struct MemoryConnection {
    pub sent: Vec<Vec<u8>>,
    pub closed_with: Option<Vec<u8>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed_with.is_some()
    }

    /// Everything written, in order, as lossy UTF-8.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for chunk in self.sent.iter().chain(self.closed_with.iter()) {
            out.push_str(&String::from_utf8_lossy(chunk));
        }
        out
    }
}

impl Connection for MemoryConnection {
    fn send(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection already closed",
            ));
        }
        self.sent.push(bytes);
        Ok(())
    }

    fn close(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        self.closed_with = Some(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_connection_refuses_after_close() {
        let mut conn = StreamConnection::new(Vec::new());
        conn.send(b"one".to_vec()).unwrap();
        conn.close(b"two".to_vec()).unwrap();
        assert!(conn.is_closed());
        assert!(conn.send(b"three".to_vec()).is_err());
        assert_eq!(conn.into_inner(), b"onetwo");
    }

    #[test]
    fn test_memory_connection_transcript() {
        let mut conn = MemoryConnection::new();
        conn.send(b"a".to_vec()).unwrap();
        conn.close(b"b".to_vec()).unwrap();
        assert_eq!(conn.transcript(), "ab");
        assert!(conn.send(b"c".to_vec()).is_err());
    }
}
