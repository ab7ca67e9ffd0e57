//! Message framing for the STK500v2 protocol.
//!
//! Frame format:
//! - START (1 byte): 0x1B synchronization byte
//! - SEQUENCE (1 byte): echoed in the response, never validated
//! - LENGTH (2 bytes): body length, big endian (0-275)
//! - TOKEN (1 byte): 0x0E
//! - BODY (LENGTH bytes): command code followed by command data
//! - CHECKSUM (1 byte): XOR of every preceding byte, START included
//!
//! Requests and responses share the layout. The engine keeps a single body
//! buffer: handlers read the request out of it and write their answer back
//! into it in place before [`FrameEngine::send_response`] frames it.

use embedded_io::{Read, ReadReady, Write};
use heapless::Vec;

use crate::commands::{Status, ANSWER_CKSUM_ERROR};

/// Frame synchronization byte
pub const MESSAGE_START: u8 = 0x1B;

/// Header terminator
pub const TOKEN: u8 = 0x0E;

/// Header size in bytes (START, SEQUENCE, LENGTH, TOKEN)
pub const HEADER_SIZE: usize = 5;

/// Maximum body size in bytes
pub const MAX_BODY_SIZE: usize = 275;

/// Maximum complete frame size (header + body + checksum)
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_BODY_SIZE + 1;

/// Errors that can occur during frame parsing or encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Bad start byte, token or declared length; the engine resynchronizes
    HeaderError,
    /// Checksum mismatch; a checksum-error answer is pending
    ChecksumError,
    /// Body exceeds maximum allowed size
    BodyTooLarge,
    /// Buffer too small for encoding
    BufferTooSmall,
}

/// Failure while polling a host link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollError<E> {
    /// The byte stream did not form a valid frame
    Frame(FrameError),
    /// The link itself failed
    Io(E),
}

impl<E> From<FrameError> for PollError<E> {
    fn from(err: FrameError) -> Self {
        PollError::Frame(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Waiting for START byte
    Idle,
    /// Reading the rest of the header
    Header,
    /// Reading body bytes and the checksum
    Body,
    /// A request is held until the response goes out
    Complete,
}

/// Incremental frame parser and response encoder
#[derive(Debug, Clone)]
pub struct FrameEngine {
    state: ParseState,
    header: [u8; HEADER_SIZE],
    // Body plus the trailing checksum byte
    body: [u8; MAX_BODY_SIZE + 1],
    bytes_read: usize,
    bytes_wanted: usize,
    checksum: u8,
    sequence: u8,
    size: usize,
}

impl Default for FrameEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEngine {
    /// Create an idle engine
    pub const fn new() -> Self {
        Self {
            state: ParseState::Idle,
            header: [0; HEADER_SIZE],
            body: [0; MAX_BODY_SIZE + 1],
            bytes_read: 0,
            bytes_wanted: 1,
            checksum: 0,
            sequence: 0,
            size: 0,
        }
    }

    /// Drop any partial frame and wait for the next START byte
    pub fn reset(&mut self) {
        self.state = ParseState::Idle;
        self.bytes_read = 0;
        self.bytes_wanted = 1;
        self.checksum = 0;
    }

    /// Feed a single byte to the parser
    ///
    /// Returns `Ok(Some(command))` when a verified request is complete,
    /// `Ok(None)` when more bytes are needed, or `Err` on a framing error.
    /// Once a request is complete, further bytes are ignored until a
    /// response is sent. After [`FrameError::ChecksumError`] the body holds
    /// the checksum-error answer and the caller must send it.
    pub fn feed(&mut self, byte: u8) -> Result<Option<u8>, FrameError> {
        match self.state {
            ParseState::Complete => Ok(None),
            ParseState::Idle => {
                self.checksum = byte;
                if byte != MESSAGE_START {
                    self.reset();
                    return Err(FrameError::HeaderError);
                }
                self.header[0] = byte;
                self.bytes_read = 1;
                self.bytes_wanted = HEADER_SIZE;
                self.state = ParseState::Header;
                Ok(None)
            }
            ParseState::Header => {
                self.checksum ^= byte;
                self.header[self.bytes_read] = byte;
                self.bytes_read += 1;
                if self.bytes_read < self.bytes_wanted {
                    return Ok(None);
                }

                let length = u16::from_be_bytes([self.header[2], self.header[3]]) as usize;
                if self.header[4] != TOKEN || length > MAX_BODY_SIZE {
                    trace!("header rejected, length {}", length);
                    self.reset();
                    return Err(FrameError::HeaderError);
                }

                self.sequence = self.header[1];
                self.bytes_read = 0;
                self.bytes_wanted = length + 1; // checksum byte
                self.state = ParseState::Body;
                Ok(None)
            }
            ParseState::Body => {
                self.checksum ^= byte;
                self.body[self.bytes_read] = byte;
                self.bytes_read += 1;
                if self.bytes_read < self.bytes_wanted {
                    return Ok(None);
                }

                self.size = self.bytes_read - 1;
                if self.checksum != 0 {
                    debug!("checksum mismatch on sequence {}", self.sequence);
                    self.body[0] = ANSWER_CKSUM_ERROR;
                    self.state = ParseState::Complete;
                    return Err(FrameError::ChecksumError);
                }

                if self.size == 0 {
                    // The slot held the checksum; an empty request has no command
                    self.body[0] = 0;
                }
                self.state = ParseState::Complete;
                trace!("command {:#x} ({} bytes)", self.body[0], self.size);
                Ok(Some(self.body[0]))
            }
        }
    }

    /// Feed multiple bytes to the parser
    ///
    /// Stops at the first complete request or framing error; the remaining
    /// bytes are not consumed.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Result<Option<u8>, FrameError> {
        for &byte in bytes {
            if let Some(command) = self.feed(byte)? {
                return Ok(Some(command));
            }
        }
        Ok(None)
    }

    /// Read at most one byte from `link` without blocking
    ///
    /// A checksum error is answered on the link before it is reported.
    /// Nothing is read while a request is waiting for its response.
    pub fn poll<L>(&mut self, link: &mut L) -> Result<Option<u8>, PollError<L::Error>>
    where
        L: Read + ReadReady + Write,
    {
        if self.state == ParseState::Complete || !link.read_ready().map_err(PollError::Io)? {
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        if link.read(&mut byte).map_err(PollError::Io)? == 0 {
            return Ok(None);
        }

        match self.feed(byte[0]) {
            Err(FrameError::ChecksumError) => {
                self.respond(link, 1, ANSWER_CKSUM_ERROR, 2)
                    .map_err(PollError::Io)?;
                Err(PollError::Frame(FrameError::ChecksumError))
            }
            other => other.map_err(PollError::Frame),
        }
    }

    /// Frame and write the first `len` body bytes with `status` at `BODY[1]`
    pub fn send_response<W: Write>(
        &mut self,
        writer: &mut W,
        status: Status,
        len: usize,
    ) -> Result<(), W::Error> {
        self.respond(writer, 1, status.as_byte(), len)
    }

    /// Frame and write an XPROG answer with `status` at `BODY[2]`
    pub fn send_xprog_response<W: Write>(
        &mut self,
        writer: &mut W,
        status: Status,
        len: usize,
    ) -> Result<(), W::Error> {
        self.respond(writer, 2, status.as_byte(), len)
    }

    fn respond<W: Write>(
        &mut self,
        writer: &mut W,
        status_index: usize,
        status: u8,
        len: usize,
    ) -> Result<(), W::Error> {
        let len = len.clamp(status_index + 1, MAX_BODY_SIZE);
        self.body[status_index] = status;

        let mut header = [0u8; HEADER_SIZE];
        let checksum = encode_header(self.sequence, len, &mut header);
        let checksum = self.body[..len].iter().fold(checksum, |acc, b| acc ^ b);

        // The engine is ready for the next request even if the link failed
        self.reset();

        writer.write_all(&header)?;
        writer.write_all(&self.body[..len])?;
        writer.write_all(&[checksum])?;
        writer.flush()
    }

    /// Request body; after a response was written it holds the answer
    pub fn body(&self) -> &[u8] {
        &self.body[..MAX_BODY_SIZE]
    }

    /// Mutable body buffer for handlers writing their answer in place
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.body[..MAX_BODY_SIZE]
    }

    /// Body buffer and received request length, borrowed together
    pub fn request_mut(&mut self) -> (&mut [u8], usize) {
        (&mut self.body[..MAX_BODY_SIZE], self.size)
    }

    /// Sequence number of the current request
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Length of the current request body
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether a request is waiting for its response
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }
}

/// Fill `out` with a frame header and return the checksum seeded by it
fn encode_header(sequence: u8, len: usize, out: &mut [u8; HEADER_SIZE]) -> u8 {
    let [len_hi, len_lo] = (len as u16).to_be_bytes();
    *out = [MESSAGE_START, sequence, len_hi, len_lo, TOKEN];
    out.iter().fold(0, |acc, b| acc ^ b)
}

/// Encode a complete frame carrying `body` into `buffer`
///
/// Returns the number of bytes written. This is the host side of the link
/// and is what the tests use to build requests.
pub fn encode_frame(sequence: u8, body: &[u8], buffer: &mut [u8]) -> Result<usize, FrameError> {
    if body.is_empty() || body.len() > MAX_BODY_SIZE {
        return Err(FrameError::BodyTooLarge);
    }
    let frame_len = HEADER_SIZE + body.len() + 1;
    if buffer.len() < frame_len {
        return Err(FrameError::BufferTooSmall);
    }

    let mut header = [0u8; HEADER_SIZE];
    let checksum = encode_header(sequence, body.len(), &mut header);
    let checksum = body.iter().fold(checksum, |acc, b| acc ^ b);

    buffer[..HEADER_SIZE].copy_from_slice(&header);
    buffer[HEADER_SIZE..HEADER_SIZE + body.len()].copy_from_slice(body);
    buffer[frame_len - 1] = checksum;

    Ok(frame_len)
}

/// Encode a complete frame into a heapless Vec
pub fn encode_to_vec(sequence: u8, body: &[u8]) -> Result<Vec<u8, MAX_FRAME_SIZE>, FrameError> {
    let mut buffer = [0u8; MAX_FRAME_SIZE];
    let len = encode_frame(sequence, body, &mut buffer)?;
    let mut vec = Vec::new();
    vec.extend_from_slice(&buffer[..len])
        .map_err(|_| FrameError::BufferTooSmall)?;
    Ok(vec)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec::Vec as StdVec;

    /// In-memory duplex link: bytes to read in, bytes written out
    struct Loopback {
        input: StdVec<u8>,
        pos: usize,
        output: StdVec<u8>,
    }

    impl Loopback {
        fn new(input: &[u8]) -> Self {
            Self {
                input: input.into(),
                pos: 0,
                output: StdVec::new(),
            }
        }
    }

    impl embedded_io::ErrorType for Loopback {
        type Error = core::convert::Infallible;
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let n = buf.len().min(self.input.len() - self.pos);
            buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl ReadReady for Loopback {
        fn read_ready(&mut self) -> Result<bool, Self::Error> {
            Ok(self.pos < self.input.len())
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn test_encode_sign_on_request() {
        let mut buffer = [0u8; 16];
        let len = encode_frame(0x01, &[0x01], &mut buffer).unwrap();

        assert_eq!(len, 7);
        assert_eq!(&buffer[..6], &[0x1B, 0x01, 0x00, 0x01, 0x0E, 0x01]);
        // 1B ^ 01 ^ 00 ^ 01 ^ 0E ^ 01
        assert_eq!(buffer[6], 0x14);
    }

    #[test]
    fn test_parse_complete_request() {
        let encoded = encode_to_vec(7, &[0x03, 0x98]).unwrap();
        let mut engine = FrameEngine::new();

        let command = engine.feed_bytes(&encoded).unwrap();
        assert_eq!(command, Some(0x03));
        assert!(engine.is_complete());
        assert_eq!(engine.sequence(), 7);
        assert_eq!(engine.size(), 2);
        assert_eq!(&engine.body()[..2], &[0x03, 0x98]);
    }

    #[test]
    fn test_complete_state_ignores_input() {
        let encoded = encode_to_vec(1, &[0x01]).unwrap();
        let mut engine = FrameEngine::new();
        engine.feed_bytes(&encoded).unwrap();

        assert_eq!(engine.feed(0x1B), Ok(None));
        assert_eq!(engine.body()[0], 0x01);
    }

    #[test]
    fn test_garbage_is_header_error() {
        let mut engine = FrameEngine::new();
        assert_eq!(engine.feed(0x00), Err(FrameError::HeaderError));
        assert_eq!(engine.feed(0xFF), Err(FrameError::HeaderError));

        let encoded = encode_to_vec(2, &[0x01]).unwrap();
        assert_eq!(engine.feed_bytes(&encoded), Ok(Some(0x01)));
    }

    #[test]
    fn test_bad_token_resets() {
        let mut engine = FrameEngine::new();
        let result = engine.feed_bytes(&[0x1B, 0x01, 0x00, 0x01, 0x0F]);
        assert_eq!(result, Err(FrameError::HeaderError));
        assert!(!engine.is_complete());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut engine = FrameEngine::new();
        // 276 bytes declared
        let result = engine.feed_bytes(&[0x1B, 0x01, 0x01, 0x14, 0x0E]);
        assert_eq!(result, Err(FrameError::HeaderError));
    }

    #[test]
    fn test_checksum_error_prepares_answer() {
        let mut encoded = encode_to_vec(9, &[0x01]).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x40;

        let mut engine = FrameEngine::new();
        assert_eq!(engine.feed_bytes(&encoded), Err(FrameError::ChecksumError));
        assert_eq!(engine.body()[0], ANSWER_CKSUM_ERROR);
    }

    #[test]
    fn test_send_response_layout() {
        let encoded = encode_to_vec(0x42, &[0x03, 0x98]).unwrap();
        let mut engine = FrameEngine::new();
        engine.feed_bytes(&encoded).unwrap();
        engine.body_mut()[2] = 0x02;

        let mut link = Loopback::new(&[]);
        engine.send_response(&mut link, Status::CmdOk, 3).unwrap();

        assert_eq!(
            &link.output[..8],
            &[0x1B, 0x42, 0x00, 0x03, 0x0E, 0x03, 0x00, 0x02]
        );
        assert_eq!(link.output.iter().fold(0u8, |acc, b| acc ^ b), 0);
        assert!(!engine.is_complete());
    }

    #[test]
    fn test_send_xprog_response_status_position() {
        let encoded = encode_to_vec(1, &[0x50, 0x01]).unwrap();
        let mut engine = FrameEngine::new();
        engine.feed_bytes(&encoded).unwrap();

        let mut link = Loopback::new(&[]);
        engine
            .send_xprog_response(&mut link, Status::CmdFailed, 3)
            .unwrap();

        assert_eq!(&link.output[5..8], &[0x50, 0x01, 0xC0]);
    }

    #[test]
    fn test_poll_answers_checksum_error() {
        let mut encoded = encode_to_vec(3, &[0x01]).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let mut engine = FrameEngine::new();
        let mut link = Loopback::new(&encoded);
        let mut outcome = Ok(None);
        while link.pos < link.input.len() {
            outcome = engine.poll(&mut link);
        }

        assert_eq!(outcome, Err(PollError::Frame(FrameError::ChecksumError)));
        assert_eq!(
            &link.output[..7],
            &[0x1B, 0x03, 0x00, 0x02, 0x0E, ANSWER_CKSUM_ERROR, ANSWER_CKSUM_ERROR]
        );
        assert_eq!(link.output.len(), 8);
        assert_eq!(link.output.iter().fold(0u8, |acc, b| acc ^ b), 0);
        assert!(!engine.is_complete());
    }

    #[test]
    fn test_poll_without_data_is_incomplete() {
        let mut engine = FrameEngine::new();
        let mut link = Loopback::new(&[]);
        assert_eq!(engine.poll(&mut link), Ok(None));
    }

    #[test]
    fn test_empty_body_accepted() {
        let mut buffer = [0u8; 8];
        assert_eq!(
            encode_frame(0, &[], &mut buffer),
            Err(FrameError::BodyTooLarge)
        );

        // Zero length still carries a checksum byte
        let mut engine = FrameEngine::new();
        let checksum = 0x1B ^ 0x07 ^ 0x0E;
        assert_eq!(engine.feed_bytes(&[0x1B, 0x07, 0x00, 0x00, 0x0E]), Ok(None));
        assert_eq!(engine.feed(checksum), Ok(Some(0)));
        assert_eq!(engine.size(), 0);
        assert_eq!(engine.sequence(), 0x07);
        assert!(engine.is_complete());
    }

    #[test]
    fn test_empty_body_bad_checksum() {
        let mut engine = FrameEngine::new();
        assert_eq!(
            engine.feed_bytes(&[0x1B, 0x07, 0x00, 0x00, 0x0E, 0x00]),
            Err(FrameError::ChecksumError)
        );
        assert_eq!(engine.body()[0], ANSWER_CKSUM_ERROR);
    }
}
