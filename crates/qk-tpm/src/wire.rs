//! Big-endian TPM2 command/response marshaling helpers. There is no viable `no_std` TPM2
//! marshaling crate in this ecosystem, so command bodies are hand-encoded the same way the
//! rest of this workspace encodes other fixed wire formats (FAT directory entries, xHCI TRBs):
//! fixed-offset struct-of-bytes writers and a cursor-based reader, not a derive-based
//! serialiser.

use alloc::vec::Vec;

use crate::error::TpmError;

pub const TPM_ST_NO_SESSIONS: u16 = 0x8001;
pub const TPM_ST_SESSIONS: u16 = 0x8002;

/// Appends a TPM2 command header (`tag`, placeholder size, `command_code`) and returns the
/// in-progress buffer; callers append the command body and then call [`finish`].
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn command(tag: u16, command_code: u32) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&tag.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes()); // commandSize placeholder
        buf.extend_from_slice(&command_code.to_be_bytes());
        Self { buf }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// A `TPM2B_*`-style length-prefixed byte string.
    pub fn tpm2b(&mut self, data: &[u8]) -> &mut Self {
        self.u16(data.len() as u16);
        self.buf.extend_from_slice(data);
        self
    }

    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Appends a minimal password-authorization session area (`TPM_RS_PW`, empty nonce, no
    /// session attributes, empty HMAC) for hierarchy handles whose auth value is empty.
    pub fn password_session(&mut self) -> &mut Self {
        let mut session = Vec::new();
        session.extend_from_slice(&crate::tpm2::TPM_RS_PW.to_be_bytes());
        session.extend_from_slice(&0u16.to_be_bytes()); // nonceCaller, empty
        session.push(0); // sessionAttributes
        session.extend_from_slice(&0u16.to_be_bytes()); // hmac, empty
        self.u32(session.len() as u32);
        self.raw(&session)
    }

    /// Backpatches `commandSize` and returns the finished command buffer.
    pub fn finish(mut self) -> Vec<u8> {
        let size = self.buf.len() as u32;
        self.buf[2..6].copy_from_slice(&size.to_be_bytes());
        self.buf
    }
}

/// A cursor over a TPM2 response: header already validated by [`Reader::response`].
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Validates the response header (`tag`, `responseSize`, `responseCode`) and returns a
    /// reader positioned just after it.
    pub fn response(buf: &'a [u8]) -> Result<Self, TpmError> {
        if buf.len() < 10 {
            return Err(TpmError::InvalidFormat);
        }
        let code = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
        if code != 0 {
            return Err(TpmError::ResponseCode(code));
        }
        Ok(Self { buf, pos: 10 })
    }

    pub fn u32(&mut self) -> Result<u32, TpmError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn u16(&mut self) -> Result<u16, TpmError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Reads a `TPM2B_*`-style length-prefixed byte string.
    pub fn tpm2b(&mut self) -> Result<&'a [u8], TpmError> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], TpmError> {
        if self.pos + len > self.buf.len() {
            return Err(TpmError::InvalidFormat);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), TpmError> {
        self.take(len)?;
        Ok(())
    }

    /// For `TPM_ST_SESSIONS` responses: the `parameterSize` field that separates the handle
    /// area from the parameter area.
    pub fn parameter_size(&mut self) -> Result<u32, TpmError> {
        self.u32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_backpatches_command_size() {
        let mut w = Writer::command(TPM_ST_NO_SESSIONS, 0x1234);
        w.u32(0xDEAD_BEEF);
        let cmd = w.finish();
        assert_eq!(u16::from_be_bytes([cmd[0], cmd[1]]), TPM_ST_NO_SESSIONS);
        assert_eq!(u32::from_be_bytes([cmd[2], cmd[3], cmd[4], cmd[5]]), cmd.len() as u32);
        assert_eq!(u32::from_be_bytes([cmd[6], cmd[7], cmd[8], cmd[9]]), 0x1234);
    }

    #[test]
    fn reader_rejects_nonzero_response_code() {
        let mut resp = Vec::new();
        resp.extend_from_slice(&TPM_ST_NO_SESSIONS.to_be_bytes());
        resp.extend_from_slice(&10u32.to_be_bytes());
        resp.extend_from_slice(&0x0000_0101u32.to_be_bytes());
        assert_eq!(Reader::response(&resp), Err(TpmError::ResponseCode(0x0000_0101)));
    }

    #[test]
    fn tpm2b_round_trips_through_writer_and_reader() {
        let mut w = Writer::command(TPM_ST_NO_SESSIONS, 1);
        w.tpm2b(b"hello");
        let cmd = w.finish();
        let mut r = Reader { buf: &cmd, pos: 10 };
        assert_eq!(r.tpm2b().unwrap(), b"hello");
    }
}
