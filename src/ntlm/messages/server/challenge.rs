use byteorder::{LittleEndian, WriteBytesExt};

use crate::negotiate::ServerConfig;
use crate::ntlm::messages::computations::get_challenge_target_info;
use crate::ntlm::messages::{write_ntlm_header, MessageFields, MessageTypes};
use crate::ntlm::{AuthSession, NegotiateFlags};
use crate::Result;

const HEADER_SIZE: usize = 48;

struct ChallengeMessageFields {
    target_name: MessageFields,
    target_info: MessageFields,
}

impl ChallengeMessageFields {
    fn new(offset: u32, target_info: Vec<u8>) -> Self {
        let target_name = MessageFields::new().at(offset);
        let target_info = MessageFields::with_buffer(target_info).after(&target_name);

        Self {
            target_name,
            target_info,
        }
    }

    fn data_len(&self) -> usize {
        self.target_info.end() as usize
    }
}

/// Builds the CHALLENGE message: an empty target name, the session's challenge and the server
/// names as target information.
pub(super) fn write_challenge(session: &AuthSession, config: &ServerConfig) -> Result<Vec<u8>> {
    let message_fields = ChallengeMessageFields::new(
        HEADER_SIZE as u32,
        get_challenge_target_info(config)?,
    );

    let mut buffer = Vec::with_capacity(message_fields.data_len());

    write_ntlm_header(&mut buffer, MessageTypes::Challenge)?;
    message_fields.target_name.write_to(&mut buffer)?; // 8 bytes
    buffer.write_u32::<LittleEndian>(get_flags().bits())?; // 4 bytes
    buffer.extend_from_slice(&session.challenge); // 8 bytes
    buffer.write_u64::<LittleEndian>(0)?; // reserved 8 bytes
    message_fields.target_info.write_to(&mut buffer)?; // 8 bytes

    message_fields.target_name.write_buffer_to(&mut buffer)?;
    message_fields.target_info.write_buffer_to(&mut buffer)?;

    Ok(buffer)
}

fn get_flags() -> NegotiateFlags {
    NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_NTLM
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_TARGET_INFO
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_TARGET_TYPE_DOMAIN
        | NegotiateFlags::NTLM_SSP_NEGOTIATE128
        | NegotiateFlags::NTLM_SSP_NEGOTIATE56
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_SIGN
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_SEAL
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_KEY_EXCH
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY
}
