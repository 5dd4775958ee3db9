//! Request/response framing.
//!
//! ```text
//! request:  A5 | opcode | seq | len | params[len]         | xor(opcode..params)
//! response: 5A | opcode | seq | status | len | result[len] | xor(opcode..result)
//! ```
//!
//! The transport is a plain byte stream, so the decoders accept partial
//! input and report `Ok(None)` until a whole frame is buffered.

use crate::error::{WireError, WireResult};
use crate::opcode::{Opcode, Status};

/// First byte of every request frame.
pub const REQUEST_SYNC: u8 = 0xA5;

/// First byte of every response frame.
pub const RESPONSE_SYNC: u8 = 0x5A;

/// Largest parameter/result block a single frame can carry.
pub const MAX_BLOCK_LEN: usize = u8::MAX as usize;

const REQUEST_HEADER_LEN: usize = 4;
const RESPONSE_HEADER_LEN: usize = 5;

/// A command sent from host to device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    /// Sequence number, echoed by the device. Retries reuse it.
    pub seq: u8,
    pub params: Vec<u8>,
}

impl Request {
    pub fn new(opcode: Opcode, seq: u8, params: Vec<u8>) -> Self {
        Self {
            opcode,
            seq,
            params,
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> WireResult<Vec<u8>> {
        if self.params.len() > MAX_BLOCK_LEN {
            return Err(WireError::ParamsTooLong {
                len: self.params.len(),
            });
        }
        let mut out = Vec::with_capacity(REQUEST_HEADER_LEN + self.params.len() + 1);
        out.push(REQUEST_SYNC);
        out.push(self.opcode.into());
        out.push(self.seq);
        out.push(self.params.len() as u8);
        out.extend_from_slice(&self.params);
        out.push(checksum(&out[1..]));
        Ok(out)
    }

    /// Decode one request from the front of `buf`.
    ///
    /// Returns the request and the number of bytes consumed, or `None` when
    /// `buf` does not yet hold a complete frame.
    pub fn decode(buf: &[u8]) -> WireResult<Option<(Self, usize)>> {
        let Some(&sync) = buf.first() else {
            return Ok(None);
        };
        if sync != REQUEST_SYNC {
            return Err(WireError::BadSync {
                expected: REQUEST_SYNC,
                found: sync,
            });
        }
        if buf.len() < REQUEST_HEADER_LEN {
            return Ok(None);
        }
        let len = buf[3] as usize;
        let total = REQUEST_HEADER_LEN + len + 1;
        if buf.len() < total {
            return Ok(None);
        }
        verify_checksum(&buf[1..total - 1], buf[total - 1])?;
        let opcode = Opcode::try_from(buf[1])?;
        let request = Self {
            opcode,
            seq: buf[2],
            params: buf[REQUEST_HEADER_LEN..total - 1].to_vec(),
        };
        Ok(Some((request, total)))
    }
}

/// A device reply to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub opcode: Opcode,
    pub seq: u8,
    pub status: Status,
    pub result: Vec<u8>,
}

impl Response {
    pub fn new(opcode: Opcode, seq: u8, status: Status, result: Vec<u8>) -> Self {
        Self {
            opcode,
            seq,
            status,
            result,
        }
    }

    /// Successful reply with an empty result block.
    pub fn ok(opcode: Opcode, seq: u8) -> Self {
        Self::new(opcode, seq, Status::Ok, Vec::new())
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> WireResult<Vec<u8>> {
        if self.result.len() > MAX_BLOCK_LEN {
            return Err(WireError::ParamsTooLong {
                len: self.result.len(),
            });
        }
        let mut out = Vec::with_capacity(RESPONSE_HEADER_LEN + self.result.len() + 1);
        out.push(RESPONSE_SYNC);
        out.push(self.opcode.into());
        out.push(self.seq);
        out.push(self.status.into());
        out.push(self.result.len() as u8);
        out.extend_from_slice(&self.result);
        out.push(checksum(&out[1..]));
        Ok(out)
    }

    /// Decode one response from the front of `buf`.
    pub fn decode(buf: &[u8]) -> WireResult<Option<(Self, usize)>> {
        let Some(&sync) = buf.first() else {
            return Ok(None);
        };
        if sync != RESPONSE_SYNC {
            return Err(WireError::BadSync {
                expected: RESPONSE_SYNC,
                found: sync,
            });
        }
        if buf.len() < RESPONSE_HEADER_LEN {
            return Ok(None);
        }
        let len = buf[4] as usize;
        let total = RESPONSE_HEADER_LEN + len + 1;
        if buf.len() < total {
            return Ok(None);
        }
        verify_checksum(&buf[1..total - 1], buf[total - 1])?;
        let opcode = Opcode::try_from(buf[1])?;
        let status = Status::try_from(buf[3])?;
        let response = Self {
            opcode,
            seq: buf[2],
            status,
            result: buf[RESPONSE_HEADER_LEN..total - 1].to_vec(),
        };
        Ok(Some((response, total)))
    }
}

/// Accumulates stream bytes and yields complete responses.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    buf: Vec<u8>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete response, if one is buffered.
    pub fn next_response(&mut self) -> WireResult<Option<Response>> {
        match Response::decode(&self.buf)? {
            Some((response, used)) => {
                self.buf.drain(..used);
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }

    /// Bytes held that do not yet form a full frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// XOR of every byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

fn verify_checksum(body: &[u8], received: u8) -> WireResult<()> {
    let computed = checksum(body);
    if computed != received {
        return Err(WireError::BadChecksum { computed, received });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        let req = Request::new(Opcode::SetSafetyMode, 7, vec![0x03, 0x00]);
        let bytes = req.encode().unwrap();
        assert_eq!(bytes, vec![0xA5, 0xDC, 0x07, 0x02, 0x03, 0x00, 0xDC ^ 0x07 ^ 0x02 ^ 0x03]);
    }

    #[test]
    fn response_decodes_across_partial_reads() {
        let resp = Response::new(Opcode::QueryHealth, 3, Status::Ok, vec![1, 2, 3]);
        let bytes = resp.encode().unwrap();

        let mut buffer = ResponseBuffer::new();
        buffer.extend(&bytes[..4]);
        assert_eq!(buffer.next_response().unwrap(), None);
        buffer.extend(&bytes[4..]);
        assert_eq!(buffer.next_response().unwrap(), Some(resp));
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn two_responses_in_one_read() {
        let a = Response::ok(Opcode::ClearQueue, 1);
        let b = Response::ok(Opcode::SendFrame, 2);
        let mut bytes = a.encode().unwrap();
        bytes.extend(b.encode().unwrap());

        let mut buffer = ResponseBuffer::new();
        buffer.extend(&bytes);
        assert_eq!(buffer.next_response().unwrap(), Some(a));
        assert_eq!(buffer.next_response().unwrap(), Some(b));
        assert_eq!(buffer.next_response().unwrap(), None);
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let mut bytes = Response::ok(Opcode::ClearQueue, 1).encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Response::decode(&bytes),
            Err(WireError::BadChecksum { .. })
        ));
    }

    #[test]
    fn wrong_sync_rejected() {
        let bytes = Request::new(Opcode::QueryHealth, 0, vec![]).encode().unwrap();
        // A request frame is not a valid response.
        assert!(matches!(
            Response::decode(&bytes),
            Err(WireError::BadSync { found: 0xA5, .. })
        ));
    }

    #[test]
    fn unknown_status_rejected() {
        let mut body = vec![0xD2, 0x00, 0x09, 0x00];
        let sum = checksum(&body);
        body.push(sum);
        let mut bytes = vec![RESPONSE_SYNC];
        bytes.extend(body);
        assert!(matches!(
            Response::decode(&bytes),
            Err(WireError::UnknownStatus(0x09))
        ));
    }

    #[test]
    fn oversized_params_refused() {
        let req = Request::new(Opcode::SendFrame, 0, vec![0; 256]);
        assert!(matches!(
            req.encode(),
            Err(WireError::ParamsTooLong { len: 256 })
        ));
    }

    #[test]
    fn request_decode_reports_consumed_bytes() {
        let req = Request::new(Opcode::ClearQueue, 9, vec![0x02]);
        let mut bytes = req.encode().unwrap();
        bytes.push(0xA5);
        let (decoded, used) = Request::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded, req);
        assert_eq!(used, bytes.len() - 1);
    }
}
