//! Command channel: one request/response exchange on the wire at a time.
//!
//! Transport timeouts with nothing received are retried immediately with
//! the same sequence number, up to `max_retries` extra attempts. Anything
//! malformed is a protocol violation: it is never retried and it poisons
//! the channel, since the device state can no longer be trusted.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::Instant;

use xcvr_protocol::{Opcode, Request, Response, ResponseBuffer, Status, WireError};

use crate::config::ChannelConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::transport::{Transport, TransportError};

/// Largest read requested from the transport in one call.
const READ_CHUNK: usize = 512;

const OPEN: u8 = 0;
const POISONED: u8 = 1;
const CLOSED: u8 = 2;
const DISCONNECTED: u8 = 3;

/// A decoded response and its position in the exchange order.
#[derive(Debug, Clone)]
pub struct Reply {
    pub response: Response,
    /// Monotonic exchange counter. Higher means issued later.
    pub serial: u64,
}

struct Link {
    transport: Box<dyn Transport>,
    rx: ResponseBuffer,
    seq: u8,
    serial: u64,
}

/// Serialized command/response channel over a `Transport`.
pub struct CommandChannel {
    link: Mutex<Link>,
    state: AtomicU8,
    /// Serial of the most recently issued exchange.
    issued: AtomicU64,
    config: ChannelConfig,
}

enum Attempt {
    Done(Response),
    TimedOut(String),
}

impl CommandChannel {
    pub fn new(transport: Box<dyn Transport>, config: ChannelConfig) -> Self {
        Self {
            link: Mutex::new(Link {
                transport,
                rx: ResponseBuffer::new(),
                seq: 0,
                serial: 0,
            }),
            state: AtomicU8::new(OPEN),
            issued: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::SeqCst) == OPEN
    }

    /// Serial of the latest exchange started, whether or not it completed.
    pub fn last_serial(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Send one command and wait for its response.
    ///
    /// Callers queue on the link mutex, so exchanges never interleave.
    pub async fn send(&self, opcode: Opcode, params: Vec<u8>) -> DeviceResult<Reply> {
        let mut link = self.link.lock().await;
        self.ensure_open()?;

        link.seq = link.seq.wrapping_add(1);
        link.serial += 1;
        self.issued.store(link.serial, Ordering::SeqCst);
        let request = Request::new(opcode, link.seq, params);
        let bytes = request.encode().map_err(|e| match e {
            WireError::ParamsTooLong { len } => {
                DeviceError::InvalidParameter(format!("{len}-byte parameter block for {opcode}"))
            }
            other => DeviceError::InvalidParameter(other.to_string()),
        })?;

        let attempts = self.config.max_attempts();
        let mut last_reason = String::new();
        for attempt in 1..=attempts {
            match self.attempt(&mut link, &request, &bytes).await? {
                Attempt::Done(response) => {
                    tracing::debug!(
                        %opcode,
                        seq = request.seq,
                        attempt,
                        status = ?response.status,
                        "exchange complete"
                    );
                    return Ok(Reply {
                        response,
                        serial: link.serial,
                    });
                }
                Attempt::TimedOut(reason) => {
                    tracing::warn!(%opcode, seq = request.seq, attempt, attempts, "{reason}");
                    last_reason = reason;
                }
            }
        }

        Err(DeviceError::DeviceUnreachable {
            attempts,
            reason: last_reason,
        })
    }

    /// Poison the channel and return the violation as an error.
    pub fn violation(&self, detail: impl std::fmt::Display) -> DeviceError {
        if self
            .state
            .compare_exchange(OPEN, POISONED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::error!(%detail, "protocol violation, channel poisoned");
        }
        DeviceError::ProtocolViolation(detail.to_string())
    }

    /// Close the transport. Later sends fail with `SessionClosed`.
    pub async fn close(&self) -> DeviceResult<()> {
        let mut link = self.link.lock().await;
        match self.state.swap(CLOSED, Ordering::SeqCst) {
            CLOSED => Ok(()),
            DISCONNECTED => {
                if let Err(e) = link.transport.close().await {
                    tracing::debug!(error = %e, "close after disconnect");
                }
                Ok(())
            }
            _ => link.transport.close().await.map_err(DeviceError::from),
        }
    }

    fn ensure_open(&self) -> DeviceResult<()> {
        match self.state.load(Ordering::SeqCst) {
            OPEN => Ok(()),
            _ => Err(DeviceError::SessionClosed),
        }
    }

    async fn attempt(
        &self,
        link: &mut Link,
        request: &Request,
        bytes: &[u8],
    ) -> DeviceResult<Attempt> {
        match link.transport.write(bytes).await {
            Ok(()) => {}
            Err(TransportError::Timeout { timeout_ms }) => {
                return Ok(Attempt::TimedOut(format!("write timed out after {timeout_ms}ms")));
            }
            Err(e) => return Err(self.unreachable(e)),
        }

        let timeout = self.config.timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let next = link
                .rx
                .next_response()
                .map_err(|e| self.violation_with(link, e))?;
            if let Some(response) = next {
                if response.seq != request.seq {
                    tracing::warn!(
                        expected = request.seq,
                        got = response.seq,
                        opcode = %response.opcode,
                        "discarding stale response"
                    );
                    continue;
                }
                if response.opcode != request.opcode {
                    return Err(self.violation(format!(
                        "response opcode {} does not match request {}",
                        response.opcode, request.opcode
                    )));
                }
                return Ok(Attempt::Done(response));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.timed_out(link, timeout.as_millis() as u64);
            }
            match link.transport.read(READ_CHUNK, remaining).await {
                Ok(chunk) => link.rx.extend(&chunk),
                Err(TransportError::Timeout { .. }) => {
                    return self.timed_out(link, timeout.as_millis() as u64);
                }
                Err(e) => return Err(self.unreachable(e)),
            }
        }
    }

    /// A timeout with a partial frame buffered is a short response.
    fn timed_out(&self, link: &mut Link, timeout_ms: u64) -> DeviceResult<Attempt> {
        let pending = link.rx.pending();
        if pending > 0 {
            link.rx.clear();
            return Err(self.violation(format!(
                "short response: {pending} byte(s) then silence for {timeout_ms}ms"
            )));
        }
        Ok(Attempt::TimedOut(format!("no response within {timeout_ms}ms")))
    }

    fn violation_with(&self, link: &mut Link, err: WireError) -> DeviceError {
        link.rx.clear();
        self.violation(err)
    }

    fn unreachable(&self, err: TransportError) -> DeviceError {
        tracing::warn!(error = %err, "transport failed");
        if err == TransportError::Disconnected
            && self
                .state
                .compare_exchange(OPEN, DISCONNECTED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            tracing::warn!("device disconnected, channel closed");
        }
        DeviceError::DeviceUnreachable {
            attempts: 1,
            reason: err.to_string(),
        }
    }
}

/// Map a non-`Ok` status to the generic error for `opcode`.
pub fn status_error(opcode: Opcode, status: Status) -> DeviceError {
    match status {
        Status::InvalidParameter => {
            DeviceError::InvalidParameter(format!("device rejected parameters for {opcode}"))
        }
        status => DeviceError::CommandRefused { opcode, status },
    }
}
