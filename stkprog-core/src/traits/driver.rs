//! Driver contract shared by the ISP, HVSP and HVPP protocols
//!
//! Every operation reads its arguments from the request body, drives the
//! hardware, writes any result back into the same body buffer and reports
//! how long the answer is. The dispatcher turns the outcome into exactly
//! one response frame.

use stkprog_protocol::Status;

use crate::session::SessionState;

/// Errors a protocol operation can end with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// The target stayed busy past the poll deadline
    ReadyTimeout,
    /// The target did not answer as expected
    Failed,
    /// The request body is too short or asks for more than fits
    Malformed,
    /// Command or parameter not supported in the current state
    Unsupported,
}

impl ProtocolError {
    /// Status code reported to the host
    pub fn status(self) -> Status {
        match self {
            ProtocolError::ReadyTimeout => Status::RdyBsyTimeout,
            ProtocolError::Failed | ProtocolError::Malformed | ProtocolError::Unsupported => {
                Status::CmdFailed
            }
        }
    }
}

impl From<ProtocolError> for Status {
    fn from(err: ProtocolError) -> Self {
        err.status()
    }
}

/// Successful answer: status and response body length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reply {
    pub status: Status,
    pub len: usize,
}

impl Reply {
    /// Plain acknowledgement: command echo and status
    pub const OK: Reply = Reply::ok(2);

    /// `STATUS_CMD_OK` with a body of `len` bytes
    pub const fn ok(len: usize) -> Self {
        Self {
            status: Status::CmdOk,
            len,
        }
    }
}

/// A received request, borrowed from the framing engine's body buffer
#[derive(Debug)]
pub struct Request<'a> {
    body: &'a mut [u8],
    size: usize,
}

impl<'a> Request<'a> {
    /// Wrap a body buffer holding `size` received bytes
    pub fn new(body: &'a mut [u8], size: usize) -> Self {
        let size = size.min(body.len());
        Self { body, size }
    }

    /// Command code
    pub fn command(&self) -> u8 {
        self.args().first().copied().unwrap_or(0)
    }

    /// Received bytes, command code first
    pub fn args(&self) -> &[u8] {
        &self.body[..self.size]
    }

    /// Received byte at `index`
    pub fn byte(&self, index: usize) -> Result<u8, ProtocolError> {
        self.args()
            .get(index)
            .copied()
            .ok_or(ProtocolError::Malformed)
    }

    /// Big-endian 16-bit value at `index`
    pub fn be_u16(&self, index: usize) -> Result<u16, ProtocolError> {
        Ok(u16::from_be_bytes([self.byte(index)?, self.byte(index + 1)?]))
    }

    /// Big-endian 32-bit value at `index`
    pub fn be_u32(&self, index: usize) -> Result<u32, ProtocolError> {
        let bytes = self.slice(index, 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// `len` received bytes starting at `start`
    pub fn slice(&self, start: usize, len: usize) -> Result<&[u8], ProtocolError> {
        self.args()
            .get(start..start + len)
            .ok_or(ProtocolError::Malformed)
    }

    /// Writable view of the output window `start..start + len`
    ///
    /// Fails when the answer would not fit the body buffer.
    pub fn output(&mut self, start: usize, len: usize) -> Result<&mut [u8], ProtocolError> {
        self.body
            .get_mut(start..start + len)
            .ok_or(ProtocolError::Malformed)
    }

    /// Store one answer byte
    pub fn put(&mut self, index: usize, value: u8) -> Result<(), ProtocolError> {
        let slot = self.body.get_mut(index).ok_or(ProtocolError::Malformed)?;
        *slot = value;
        Ok(())
    }

    /// Whole body buffer
    pub fn body_mut(&mut self) -> &mut [u8] {
        self.body
    }
}

/// Operation set common to the ISP, HVSP and HVPP protocols
///
/// Implementations keep only their pin assignment and per-mode state; the
/// hardware and the session are lent to each call. TPI has a different
/// shape and does not implement this trait.
pub trait ProgrammingProtocol<H> {
    /// Power up or reset the target into programming mode
    fn enter_progmode(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Release the target
    fn leave_progmode(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Erase flash and EEPROM
    fn chip_erase(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Write flash words at the session address
    fn program_flash(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Read flash bytes from the session address
    fn read_flash(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Write EEPROM bytes at the session address
    fn program_eeprom(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Read EEPROM bytes from the session address
    fn read_eeprom(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Write one fuse byte
    fn program_fuse(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Read one fuse byte
    fn read_fuse(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Write the lock byte
    fn program_lock(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Read the lock byte
    fn read_lock(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Read one signature byte
    fn read_signature(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;

    /// Read the oscillator calibration byte
    fn read_osc_cal(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ProtocolError::ReadyTimeout.status(), Status::RdyBsyTimeout);
        assert_eq!(ProtocolError::Failed.status(), Status::CmdFailed);
        assert_eq!(Status::from(ProtocolError::Malformed), Status::CmdFailed);
        assert_eq!(ProtocolError::Unsupported.status(), Status::CmdFailed);
    }

    #[test]
    fn test_request_accessors() {
        let mut body = [0u8; 16];
        body[..6].copy_from_slice(&[0x06, 0x80, 0x01, 0x02, 0x03, 0xFF]);
        let req = Request::new(&mut body, 5);

        assert_eq!(req.command(), 0x06);
        assert_eq!(req.be_u32(1), Ok(0x8001_0203));
        assert_eq!(req.be_u16(2), Ok(0x0102));
        // Byte 5 lies past the received length
        assert_eq!(req.byte(5), Err(ProtocolError::Malformed));
        assert_eq!(req.slice(3, 3), Err(ProtocolError::Malformed));
    }

    #[test]
    fn test_request_output_bounds() {
        let mut body = [0u8; 8];
        let mut req = Request::new(&mut body, 1);

        assert!(req.output(2, 6).is_ok());
        assert_eq!(req.output(2, 7).err(), Some(ProtocolError::Malformed));
        assert_eq!(req.put(8, 0), Err(ProtocolError::Malformed));
        req.put(7, 0xAA).unwrap();
        assert_eq!(req.body_mut()[7], 0xAA);
    }
}
