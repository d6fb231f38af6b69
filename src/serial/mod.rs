//! Serial protocol driver for echoing command/acknowledge firmware.
//!
//! The firmware protocol is half-duplex plain text:
//! - a request is a command string
//! - a response is everything read until a caller-supplied acknowledgment token
//!   appears anywhere in the stream (no length framing)
//! - the firmware sometimes echoes the command back at the start of its reply
//! - occasionally it does not reply at all
//!
//! [`exchange`] performs one request/response cycle and returns
//! [`Exchange::NoAck`] when the token never shows up. [`recover`] is the single
//! extended-timeout retry for that case; if it also fails the command is reported as
//! [`RobotError::ProtocolTimeout`]. [`write_and_return`] combines the two.
//!
//! Only one exchange may be in flight per connection. The input buffer is cleared
//! before every normal exchange so residue from an earlier timed-out command cannot
//! be mistaken for the next reply.

use std::io::ErrorKind;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{RobotError, RobotResult};

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod port;

pub use mock::{MockConnection, Reply};
#[cfg(feature = "instrument_serial")]
pub use port::{connect, discover_by_name, discover_by_vendor_id, SerialPortConnection};

/// Default read timeout configured on a freshly opened connection.
pub const DEFAULT_SERIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound for a normal exchange.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound used by the single recovery attempt.
pub const RECOVERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Default baud rate for the motion controller.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

const READ_CHUNK: usize = 256;

/// Byte transport underneath the protocol.
///
/// Implemented by [`SerialPortConnection`] for real hardware and by
/// [`MockConnection`] for tests.
pub trait SerialConnection {
    /// Currently configured read timeout.
    fn timeout(&self) -> Duration;

    /// Change the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> RobotResult<()>;

    /// Discard any bytes already received but not yet read.
    fn clear_input(&mut self) -> RobotResult<()>;

    /// Write all of `data`.
    fn write_all(&mut self, data: &[u8]) -> RobotResult<()>;

    /// Read whatever is available, blocking up to the read timeout.
    ///
    /// Returns `ErrorKind::TimedOut` when nothing arrived within the timeout.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Outcome of one request/response cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// The acknowledgment arrived; carries the trimmed payload (possibly empty).
    Response(String),
    /// The acknowledgment never arrived within the bound.
    NoAck,
}

/// Connection whose read timeout is temporarily overridden.
///
/// The saved timeout is restored when the guard is dropped, on every exit path.
pub struct TimeoutGuard<'a, C: SerialConnection + ?Sized> {
    connection: &'a mut C,
    saved: Duration,
}

impl<'a, C: SerialConnection + ?Sized> TimeoutGuard<'a, C> {
    /// Override `connection`'s timeout until the guard is dropped.
    pub fn new(connection: &'a mut C, timeout: Duration) -> RobotResult<Self> {
        let saved = connection.timeout();
        connection.set_timeout(timeout)?;
        Ok(Self { connection, saved })
    }
}

impl<C: SerialConnection + ?Sized> Deref for TimeoutGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.connection
    }
}

impl<C: SerialConnection + ?Sized> DerefMut for TimeoutGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.connection
    }
}

impl<C: SerialConnection + ?Sized> Drop for TimeoutGuard<'_, C> {
    fn drop(&mut self) {
        if let Err(e) = self.connection.set_timeout(self.saved) {
            warn!(error = %e, timeout = ?self.saved, "Failed to restore serial timeout");
        }
    }
}

/// Send `command` and wait for `ack`, with input cleared beforehand.
///
/// The connection runs at `timeout` for the duration of the call and is restored to
/// its previous timeout afterwards, even if the exchange fails.
pub fn exchange<C: SerialConnection + ?Sized>(
    command: &str,
    ack: &str,
    connection: &mut C,
    timeout: Duration,
) -> RobotResult<Exchange> {
    debug!("Write -> {:?}", command);
    connection.clear_input()?;
    let outcome = {
        let mut guarded = TimeoutGuard::new(connection, timeout)?;
        write_and_read(command, ack, &mut *guarded, timeout)?
    };
    match &outcome {
        Exchange::Response(response) => debug!("Read <- {:?}", response),
        Exchange::NoAck => warn!(command = ?command, timeout = ?timeout, "No acknowledgment"),
    }
    Ok(outcome)
}

/// Single extended-timeout retry after [`exchange`] returned [`Exchange::NoAck`].
///
/// The input buffer is not cleared, so a late reply to the first attempt is
/// accepted. There is no further retry.
pub fn recover<C: SerialConnection + ?Sized>(
    command: &str,
    ack: &str,
    connection: &mut C,
    timeout: Duration,
) -> RobotResult<String> {
    warn!(command = ?command, timeout = ?timeout, "Attempting command recovery");
    let outcome = {
        let mut guarded = TimeoutGuard::new(connection, timeout)?;
        write_and_read(command, ack, &mut *guarded, timeout)?
    };
    match outcome {
        Exchange::Response(response) => {
            debug!("Read <- {:?}", response);
            Ok(response)
        }
        Exchange::NoAck => {
            debug!("No valid response during recovery");
            Err(RobotError::ProtocolTimeout {
                command: command.to_string(),
                timeout,
            })
        }
    }
}

/// [`exchange`], followed by exactly one [`recover`] if no acknowledgment arrived.
pub fn write_and_return<C: SerialConnection + ?Sized>(
    command: &str,
    ack: &str,
    connection: &mut C,
    timeout: Duration,
    recovery_timeout: Duration,
) -> RobotResult<String> {
    match exchange(command, ack, connection, timeout)? {
        Exchange::Response(response) => Ok(response),
        Exchange::NoAck => recover(command, ack, connection, recovery_timeout),
    }
}

/// Extract the payload from raw bytes read up to (and including) `ack`.
///
/// Returns `None` when `ack` is absent. Otherwise drops everything from `ack` on,
/// strips a leading echo of `command`, and trims.
pub fn parse_response(raw: &str, command: &str, ack: &str) -> Option<String> {
    let end = raw.find(ack)?;
    let head = raw[..end].trim_start();
    let echo = command.trim();
    let body = if echo.is_empty() {
        head
    } else {
        head.strip_prefix(echo).unwrap_or(head)
    };
    Some(body.trim().to_string())
}

fn write_and_read<C: SerialConnection + ?Sized>(
    command: &str,
    ack: &str,
    connection: &mut C,
    timeout: Duration,
) -> RobotResult<Exchange> {
    connection.write_all(command.as_bytes())?;

    let deadline = Instant::now() + timeout;
    let mut received: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_CHUNK];
    let ack_bytes = ack.as_bytes();
    let mut first_read = true;

    loop {
        // The first read runs at the bound the caller installed; later reads only
        // get what is left of it.
        if !first_read {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Exchange::NoAck);
            }
            connection.set_timeout(remaining)?;
        }
        first_read = false;

        match connection.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                received.extend_from_slice(&buf[..n]);
                if contains(&received, ack_bytes) {
                    let text = String::from_utf8_lossy(&received);
                    return Ok(parse_response(&text, command, ack)
                        .map_or(Exchange::NoAck, Exchange::Response));
                }
            }
            // A silent read means the rest of the bound elapsed without a byte.
            Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(Exchange::NoAck),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    const ACK: &str = "ok\r\nok\r\n";

    #[test]
    fn test_parse_response_strips_echo_and_ack() {
        let raw = "M114.2\r\nMCS: X:1.0000 Y:2.0000\r\nok\r\nok\r\n";
        assert_eq!(
            parse_response(raw, "M114.2\r\n", ACK),
            Some("MCS: X:1.0000 Y:2.0000".to_string())
        );
    }

    #[test]
    fn test_parse_response_without_echo() {
        assert_eq!(
            parse_response("  payload \r\nok\r\nok\r\n", "G0 X1", ACK),
            Some("payload".to_string())
        );
    }

    #[test]
    fn test_parse_response_empty_payload() {
        assert_eq!(
            parse_response("G28.2 X\r\nok\r\nok\r\n", "G28.2 X\r\n", ACK),
            Some(String::new())
        );
    }

    #[test]
    fn test_parse_response_echo_only_stripped_at_start() {
        assert_eq!(
            parse_response("value M400\r\nok\r\nok\r\n", "M400", ACK),
            Some("value M400".to_string())
        );
    }

    #[test]
    fn test_parse_response_missing_ack() {
        assert_eq!(parse_response("partial", "cmd", ACK), None);
    }

    #[test]
    fn test_exchange_returns_payload() {
        let mut conn = MockConnection::new().with_reply(Reply::echo_then("payload\r\n", ACK));
        let outcome = exchange("M114.2\r\n", ACK, &mut conn, Duration::from_secs(1)).unwrap();
        assert_eq!(outcome, Exchange::Response("payload".to_string()));
        assert_eq!(conn.written(), vec!["M114.2\r\n".to_string()]);
    }

    #[test]
    fn test_exchange_clears_stale_input() {
        let mut conn = MockConnection::new()
            .with_stale_input("junk ok\r\nok\r\n")
            .with_reply(Reply::data(format!("fresh{}", ACK)));
        let outcome = exchange("cmd", ACK, &mut conn, Duration::from_secs(1)).unwrap();
        assert_eq!(outcome, Exchange::Response("fresh".to_string()));
        assert_eq!(conn.clear_count(), 1);
    }

    #[test]
    fn test_exchange_reassembles_fragmented_reply() {
        let mut conn = MockConnection::new()
            .with_chunk_size(3)
            .with_reply(Reply::data(format!("M119 min_x:0{}", ACK)));
        let outcome = exchange("M119", ACK, &mut conn, Duration::from_secs(1)).unwrap();
        assert_eq!(outcome, Exchange::Response("min_x:0".to_string()));
    }

    #[test]
    fn test_later_reads_only_get_the_remaining_bound() {
        let mut conn = MockConnection::new()
            .with_chunk_size(4)
            .with_reply(Reply::data(format!("payload{}", ACK)));
        let bound = Duration::from_secs(2);
        let outcome = exchange("cmd", ACK, &mut conn, bound).unwrap();
        assert_eq!(outcome, Exchange::Response("payload".to_string()));

        let history = conn.timeout_history();
        let (restore, during) = history.split_last().unwrap();
        assert_eq!(*restore, DEFAULT_SERIAL_TIMEOUT);
        assert_eq!(during[0], bound);
        assert!(during.len() > 2);
        assert!(during.windows(2).all(|pair| pair[1] <= pair[0]));
        assert!(during[1..].iter().all(|t| *t <= bound));
    }

    #[test]
    fn test_exchange_no_ack_is_distinct_from_empty() {
        let mut conn = MockConnection::new().with_reply(Reply::data("half a reply"));
        let outcome = exchange("cmd", ACK, &mut conn, Duration::from_secs(1)).unwrap();
        assert_eq!(outcome, Exchange::NoAck);

        let mut conn = MockConnection::new().with_reply(Reply::data(ACK));
        let outcome = exchange("cmd", ACK, &mut conn, Duration::from_secs(1)).unwrap();
        assert_eq!(outcome, Exchange::Response(String::new()));
    }

    #[test]
    fn test_exchange_restores_timeout() {
        let mut conn = MockConnection::new().with_reply(Reply::data(ACK));
        let original = conn.timeout();
        exchange("cmd", ACK, &mut conn, Duration::from_secs(30)).unwrap();
        assert_eq!(conn.timeout(), original);
        assert_eq!(
            conn.timeout_history(),
            vec![Duration::from_secs(30), original]
        );
    }

    #[test]
    fn test_exchange_restores_timeout_on_error() {
        let mut conn = MockConnection::new().with_read_error(ErrorKind::BrokenPipe);
        let original = conn.timeout();
        let result = exchange("cmd", ACK, &mut conn, Duration::from_secs(30));
        assert!(matches!(result, Err(RobotError::Io(_))));
        assert_eq!(conn.timeout(), original);
    }

    #[test]
    fn test_recover_is_single_attempt() {
        let mut conn = MockConnection::new()
            .with_reply(Reply::Silent)
            .with_reply(Reply::Silent)
            .with_reply(Reply::data(ACK));

        let first = exchange("G28.2 X", ACK, &mut conn, Duration::from_secs(1)).unwrap();
        assert_eq!(first, Exchange::NoAck);

        let err = recover("G28.2 X", ACK, &mut conn, RECOVERY_TIMEOUT).unwrap_err();
        match err {
            RobotError::ProtocolTimeout { command, timeout } => {
                assert_eq!(command, "G28.2 X");
                assert_eq!(timeout, RECOVERY_TIMEOUT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(conn.written().len(), 2);
        assert_eq!(conn.timeout(), DEFAULT_SERIAL_TIMEOUT);
    }

    #[test]
    fn test_recover_skips_buffer_clear() {
        let mut conn = MockConnection::new()
            .with_reply(Reply::Silent)
            .with_reply(Reply::data(format!("late{}", ACK)));

        exchange("cmd", ACK, &mut conn, Duration::from_secs(1)).unwrap();
        let response = recover("cmd", ACK, &mut conn, RECOVERY_TIMEOUT).unwrap();
        assert_eq!(response, "late");
        assert_eq!(conn.clear_count(), 1);
    }

    #[test]
    fn test_write_and_return_recovers_once() {
        let mut conn = MockConnection::new()
            .with_reply(Reply::Silent)
            .with_reply(Reply::data(format!("done{}", ACK)));
        let response = write_and_return(
            "cmd",
            ACK,
            &mut conn,
            Duration::from_secs(1),
            RECOVERY_TIMEOUT,
        )
        .unwrap();
        assert_eq!(response, "done");
        assert_eq!(
            conn.timeout_history(),
            vec![
                Duration::from_secs(1),
                DEFAULT_SERIAL_TIMEOUT,
                RECOVERY_TIMEOUT,
                DEFAULT_SERIAL_TIMEOUT
            ]
        );
    }

    #[traced_test]
    #[test]
    fn test_exchange_logs_traffic() {
        let mut conn = MockConnection::new().with_reply(Reply::data(format!("pong{}", ACK)));
        exchange("ping", ACK, &mut conn, Duration::from_secs(1)).unwrap();
        assert!(logs_contain("Write -> \"ping\""));
        assert!(logs_contain("Read <- \"pong\""));
    }

    #[traced_test]
    #[test]
    fn test_missing_ack_is_logged() {
        let mut conn = MockConnection::new();
        let result = write_and_return(
            "G28.2 X",
            ACK,
            &mut conn,
            Duration::from_secs(1),
            RECOVERY_TIMEOUT,
        );
        assert!(result.is_err());
        assert!(logs_contain("No acknowledgment"));
        assert!(logs_contain("Attempting command recovery"));
    }
}
