//! Mock Serial Connection
//!
//! In-memory [`SerialConnection`] for exercising the protocol without hardware.
//! Each write consumes the next scripted [`Reply`] (or asks the responder closure
//! when the script is exhausted) and queues its bytes for reading. Reads with
//! nothing queued time out immediately instead of sleeping.
//!
//! Everything observable is recorded: written commands, every timeout change and
//! every input clear.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use liquid_handler::serial::{exchange, Exchange, MockConnection, Reply};
//!
//! let mut conn = MockConnection::new().with_reply(Reply::echo_then("X:1.0", "ok\r\n"));
//! let outcome = exchange("M114", "ok\r\n", &mut conn, Duration::from_secs(1)).unwrap();
//! assert_eq!(outcome, Exchange::Response("X:1.0".to_string()));
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

use crate::error::RobotResult;
use crate::serial::{SerialConnection, DEFAULT_SERIAL_TIMEOUT};

/// What the simulated firmware sends back after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Raw bytes.
    Data(Vec<u8>),
    /// Echo of the written command, then `payload`, then `ack`.
    Echo {
        /// Text after the echo
        payload: String,
        /// Acknowledgment token
        ack: String,
    },
    /// Nothing at all.
    Silent,
}

impl Reply {
    /// Raw text reply.
    pub fn data(text: impl Into<String>) -> Self {
        Reply::Data(text.into().into_bytes())
    }

    /// Reply that echoes the command before its payload.
    pub fn echo_then(payload: impl Into<String>, ack: impl Into<String>) -> Self {
        Reply::Echo {
            payload: payload.into(),
            ack: ack.into(),
        }
    }
}

type Responder = Box<dyn FnMut(&str) -> Reply + Send>;

/// Scripted serial connection.
pub struct MockConnection {
    incoming: VecDeque<u8>,
    replies: VecDeque<Reply>,
    responder: Option<Responder>,
    written: Vec<String>,
    timeout: Duration,
    timeout_history: Vec<Duration>,
    clear_count: usize,
    chunk_size: usize,
    read_error: Option<ErrorKind>,
}

impl MockConnection {
    /// Connection with no scripted replies, at the default read timeout.
    pub fn new() -> Self {
        Self {
            incoming: VecDeque::new(),
            replies: VecDeque::new(),
            responder: None,
            written: Vec::new(),
            timeout: DEFAULT_SERIAL_TIMEOUT,
            timeout_history: Vec::new(),
            clear_count: 0,
            chunk_size: usize::MAX,
            read_error: None,
        }
    }

    /// Queue a reply for the next unanswered write.
    pub fn with_reply(mut self, reply: Reply) -> Self {
        self.replies.push_back(reply);
        self
    }

    /// Answer writes with `responder` once the scripted replies run out.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&str) -> Reply + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Bytes already waiting in the input buffer before the first write.
    pub fn with_stale_input(mut self, text: &str) -> Self {
        self.incoming.extend(text.bytes());
        self
    }

    /// Deliver at most `size` bytes per read.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Fail the next read with `kind`.
    pub fn with_read_error(mut self, kind: ErrorKind) -> Self {
        self.read_error = Some(kind);
        self
    }

    /// Queue a reply on an existing connection.
    pub fn push_reply(&mut self, reply: Reply) {
        self.replies.push_back(reply);
    }

    /// Commands written so far.
    pub fn written(&self) -> Vec<String> {
        self.written.clone()
    }

    /// Every timeout set on the connection, in order.
    pub fn timeout_history(&self) -> Vec<Duration> {
        self.timeout_history.clone()
    }

    /// How many times the input buffer was cleared.
    pub fn clear_count(&self) -> usize {
        self.clear_count
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("pending_bytes", &self.incoming.len())
            .field("scripted_replies", &self.replies.len())
            .field("written", &self.written.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SerialConnection for MockConnection {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> RobotResult<()> {
        self.timeout = timeout;
        self.timeout_history.push(timeout);
        Ok(())
    }

    fn clear_input(&mut self) -> RobotResult<()> {
        self.incoming.clear();
        self.clear_count += 1;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> RobotResult<()> {
        let command = String::from_utf8_lossy(data).into_owned();
        let reply = match self.replies.pop_front() {
            Some(reply) => reply,
            None => match self.responder.as_mut() {
                Some(responder) => responder(&command),
                None => Reply::Silent,
            },
        };

        match reply {
            Reply::Data(bytes) => self.incoming.extend(bytes),
            Reply::Echo { payload, ack } => {
                self.incoming.extend(command.bytes());
                self.incoming.extend(payload.bytes());
                self.incoming.extend(ack.bytes());
            }
            Reply::Silent => {}
        }
        self.written.push(command);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(kind) = self.read_error.take() {
            return Err(kind.into());
        }
        if self.incoming.is_empty() {
            return Err(ErrorKind::TimedOut.into());
        }

        let n = buf.len().min(self.chunk_size).min(self.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(self.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_connection_times_out() {
        let mut conn = MockConnection::new();
        conn.write_all(b"cmd").unwrap();
        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn test_responder_answers_after_script() {
        let mut conn = MockConnection::new()
            .with_reply(Reply::data("first"))
            .with_responder(|command| Reply::data(command.to_uppercase()));

        conn.write_all(b"a").unwrap();
        conn.write_all(b"b").unwrap();
        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"firstB");
    }

    #[test]
    fn test_chunked_reads() {
        let mut conn = MockConnection::new()
            .with_chunk_size(2)
            .with_reply(Reply::data("abcde"));
        conn.write_all(b"x").unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(conn.read(&mut buf).unwrap(), 2);
        assert_eq!(conn.read(&mut buf).unwrap(), 2);
        assert_eq!(conn.read(&mut buf).unwrap(), 1);
    }
}
