use byteorder::{LittleEndian, ReadBytesExt};

use crate::ntlm::messages::computations::get_timestamp;
use crate::ntlm::messages::{
    check_header_size, read_exact_array, read_header_fields, read_ntlm_header, FieldDescriptor,
    MessageTypes, NTLM_SIGNATURE,
};
use crate::ntlm::{NegotiateFlags, CHALLENGE_SIZE};
use crate::{Error, ErrorKind, Result};

/// Signature, type, target name field and flags: what precedes the server challenge.
const CHALLENGE_OFFSET: usize = 24;
/// Old servers stop after the challenge.
const MIN_HEADER_SIZE: usize = CHALLENGE_OFFSET + CHALLENGE_SIZE;
const HEADER_SIZE: usize = 48;

#[derive(Debug, Clone)]
pub(crate) struct ChallengeMessage<'a> {
    pub flags: NegotiateFlags,
    pub server_challenge: [u8; CHALLENGE_SIZE],
    pub target_info: Option<&'a [u8]>,
    pub timestamp: Option<u64>,
}

pub(crate) fn read_challenge(message: &[u8]) -> Result<ChallengeMessage<'_>> {
    check_header_size(message, MIN_HEADER_SIZE, MessageTypes::Challenge)?;
    read_ntlm_header(message, MessageTypes::Challenge)?;

    let mut cursor = read_header_fields(message);
    let _target_name = FieldDescriptor::read_from(&mut cursor)?;
    let flags =
        NegotiateFlags::from_bits(cursor.read_u32::<LittleEndian>()?).unwrap_or_else(NegotiateFlags::empty);
    let server_challenge = read_exact_array::<CHALLENGE_SIZE>(&mut cursor)?;

    let target_info = if message.len() >= HEADER_SIZE {
        let _reserved = cursor.read_u64::<LittleEndian>()?;
        let field = FieldDescriptor::read_from(&mut cursor)?;

        Some(field.slice(message, "target info")?).filter(|target_info| !target_info.is_empty())
    } else {
        None
    };

    let timestamp = match target_info {
        Some(target_info) => get_timestamp(target_info)?,
        None => None,
    };

    Ok(ChallengeMessage {
        flags,
        server_challenge,
        target_info,
        timestamp,
    })
}

/// Finds the server challenge inside a CHALLENGE message, whether raw or nested in a SPNEGO/GSS
/// envelope.
///
/// Scans for the NTLMSSP signature and returns the 8 challenge bytes following the 24-byte
/// preamble.
pub fn locate_server_challenge(blob: &[u8]) -> Result<&[u8]> {
    let start = blob
        .windows(NTLM_SIGNATURE.len())
        .position(|window| window == NTLM_SIGNATURE)
        .ok_or_else(|| Error::new(ErrorKind::InvalidToken, "no NTLMSSP message in the security blob"))?;
    let message = &blob[start..];

    check_header_size(message, MIN_HEADER_SIZE, MessageTypes::Challenge)?;
    read_ntlm_header(message, MessageTypes::Challenge)?;

    Ok(&message[CHALLENGE_OFFSET..MIN_HEADER_SIZE])
}
