mod av_pair;
pub(super) mod client;
mod computations;
mod server;
#[cfg(test)]
mod test;

use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

pub use self::client::locate_server_challenge;
pub(crate) use self::server::accept_message;
use crate::{Error, ErrorKind, Result};

pub(crate) const NTLM_SIGNATURE: &[u8; NTLM_SIGNATURE_SIZE] = b"NTLMSSP\0";
const NTLM_SIGNATURE_SIZE: usize = 8;
const MESSAGE_TYPE_SIZE: usize = 4;
const NTLM_HEADER_SIZE: usize = NTLM_SIGNATURE_SIZE + MESSAGE_TYPE_SIZE;

#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive)]
pub(crate) enum MessageTypes {
    Negotiate = 1,
    Challenge = 2,
    Authenticate = 3,
}

/// Outgoing security buffer: `(length u16, max length u16, offset u32)` in the header, the bytes
/// themselves in the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MessageFields {
    pub buffer: Vec<u8>,
    pub buffer_offset: u32,
}

impl MessageFields {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_buffer(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            buffer_offset: 0,
        }
    }

    /// Places this buffer right after `previous`.
    pub(crate) fn after(mut self, previous: &MessageFields) -> Self {
        self.buffer_offset = previous.end();
        self
    }

    pub(crate) fn at(mut self, offset: u32) -> Self {
        self.buffer_offset = offset;
        self
    }

    pub(crate) fn end(&self) -> u32 {
        self.buffer_offset + self.buffer.len() as u32
    }

    pub(crate) fn write_to(&self, mut stream: impl io::Write) -> io::Result<()> {
        let length = u16::try_from(self.buffer.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "security buffer is too long"))?;

        stream.write_u16::<LittleEndian>(length)?; // len 2 bytes
        stream.write_u16::<LittleEndian>(length)?; // max len 2 bytes
        stream.write_u32::<LittleEndian>(self.buffer_offset)?; // offset 4 bytes

        Ok(())
    }

    pub(crate) fn write_buffer_to(&self, mut stream: impl io::Write) -> io::Result<()> {
        stream.write_all(&self.buffer)
    }
}

/// Incoming security buffer descriptor. The payload stays in the received message.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub(crate) struct FieldDescriptor {
    length: u16,
    offset: u32,
}

impl FieldDescriptor {
    pub(crate) fn read_from(mut stream: impl io::Read) -> io::Result<Self> {
        let length = stream.read_u16::<LittleEndian>()?;
        let _max_length = stream.read_u16::<LittleEndian>()?;
        let offset = stream.read_u32::<LittleEndian>()?;

        Ok(Self { length, offset })
    }

    /// Resolves the descriptor against the whole message, checking `offset + length <= len`.
    pub(crate) fn slice<'a>(&self, message: &'a [u8], name: &str) -> Result<&'a [u8]> {
        if self.length == 0 {
            return Ok(&[]);
        }

        let start = self.offset as usize;
        let end = start + usize::from(self.length);
        message.get(start..end).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidToken,
                format!(
                    "{name} buffer ({} bytes at offset {}) is outside of the {}-byte message",
                    self.length,
                    self.offset,
                    message.len()
                ),
            )
        })
    }
}

pub(crate) fn is_ntlmssp_message(blob: &[u8]) -> bool {
    blob.starts_with(NTLM_SIGNATURE)
}

/// Reads the signature and the message type.
pub(crate) fn read_message_type(mut stream: impl io::Read) -> Result<MessageTypes> {
    let mut signature = [0x00; NTLM_SIGNATURE_SIZE];
    stream.read_exact(signature.as_mut())?;

    if &signature != NTLM_SIGNATURE {
        return Err(Error::new(ErrorKind::InvalidToken, "Read NTLM signature is invalid"));
    }

    let message_type = stream.read_u32::<LittleEndian>()?;

    MessageTypes::from_u32(message_type).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidToken,
            format!("Message type is invalid: {message_type}"),
        )
    })
}

pub(crate) fn read_ntlm_header(stream: impl io::Read, expected: MessageTypes) -> Result<()> {
    let message_type = read_message_type(stream)?;

    if message_type != expected {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!("Message type is invalid: {message_type:?}, expected: {expected:?}"),
        ));
    }

    Ok(())
}

pub(crate) fn write_ntlm_header(mut stream: impl io::Write, message_type: MessageTypes) -> io::Result<()> {
    stream.write_all(NTLM_SIGNATURE)?; // signature 8 bytes
    stream.write_u32::<LittleEndian>(message_type as u32)?; // message type 4 bytes

    Ok(())
}

/// Fails with `InvalidToken` unless `message` holds at least a `header_size`-byte fixed part.
pub(crate) fn check_header_size(message: &[u8], header_size: usize, message_type: MessageTypes) -> Result<()> {
    if message.len() < header_size {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!(
                "{message_type:?} message is {} bytes long, its fixed part alone is {header_size} bytes",
                message.len()
            ),
        ));
    }

    Ok(())
}

pub(crate) fn read_header_fields(message: &[u8]) -> io::Cursor<&[u8]> {
    let mut cursor = io::Cursor::new(message);
    cursor.set_position(NTLM_HEADER_SIZE as u64);
    cursor
}

pub(crate) fn read_exact_array<const N: usize>(mut stream: impl Read) -> io::Result<[u8; N]> {
    let mut value = [0x00; N];
    stream.read_exact(&mut value)?;

    Ok(value)
}
