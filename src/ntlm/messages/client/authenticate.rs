use byteorder::{LittleEndian, WriteBytesExt};

use super::ChallengeMessage;
use crate::ntlm::messages::computations::{compute_client_responses, ClientResponses};
use crate::ntlm::messages::{write_ntlm_header, MessageFields, MessageTypes};
use crate::ntlm::{NegotiateFlags, NtlmClient, NtlmState};
use crate::{utils, Error, ErrorKind, Result};

pub(super) const HEADER_SIZE: usize = 64;

struct AuthenticateMessageFields {
    lm_challenge_response: MessageFields,
    nt_challenge_response: MessageFields,
    domain_name: MessageFields,
    user_name: MessageFields,
    workstation: MessageFields,
    encrypted_random_session_key: MessageFields,
}

impl AuthenticateMessageFields {
    fn new(
        offset: u32,
        responses: &ClientResponses,
        domain_name: Vec<u8>,
        user_name: Vec<u8>,
        workstation: Vec<u8>,
    ) -> Self {
        let domain_name = MessageFields::with_buffer(domain_name).at(offset);
        let user_name = MessageFields::with_buffer(user_name).after(&domain_name);
        let workstation = MessageFields::with_buffer(workstation).after(&user_name);
        let lm_challenge_response = MessageFields::with_buffer(responses.lm.clone()).after(&workstation);
        let nt_challenge_response = MessageFields::with_buffer(responses.nt.clone()).after(&lm_challenge_response);
        let encrypted_random_session_key = MessageFields::new().after(&nt_challenge_response);

        Self {
            lm_challenge_response,
            nt_challenge_response,
            domain_name,
            user_name,
            workstation,
            encrypted_random_session_key,
        }
    }

    fn data_len(&self) -> usize {
        self.encrypted_random_session_key.end() as usize
    }
}

fn check_state(state: NtlmState) -> Result<()> {
    if state != NtlmState::Challenge {
        Err(Error::new(
            ErrorKind::OutOfSequence,
            "Write authenticate was fired but the state is not a Challenge",
        ))
    } else {
        Ok(())
    }
}

/// Builds AUTHENTICATE for the received CHALLENGE and records the session and MAC keys.
///
/// Anonymous credentials produce empty responses, the anonymous flag and no keys.
pub(crate) fn write_authenticate(context: &mut NtlmClient, challenge: &ChallengeMessage<'_>) -> Result<Vec<u8>> {
    check_state(context.state)?;

    let mut negotiate_flags = context.flags & challenge.flags;
    let responses = if context.credentials.is_anonymous() {
        negotiate_flags |= NegotiateFlags::NTLM_SSP_NEGOTIATE_ANONYMOUS;

        ClientResponses::anonymous()
    } else {
        compute_client_responses(
            context.encryptor.as_ref(),
            &context.credentials,
            &context.level,
            &challenge.server_challenge,
            challenge.target_info,
            challenge.timestamp,
        )?
    };

    let encode = |value: &str| {
        if negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE) {
            utils::string_to_utf16(value)
        } else {
            value.as_bytes().to_vec()
        }
    };
    let message_fields = AuthenticateMessageFields::new(
        HEADER_SIZE as u32,
        &responses,
        encode(&context.credentials.domain),
        encode(&context.credentials.username),
        encode(context.workstation.as_deref().unwrap_or_default()),
    );

    let mut buffer = Vec::new();
    buffer.try_reserve(message_fields.data_len())?;

    write_ntlm_header(&mut buffer, MessageTypes::Authenticate)?;
    message_fields.lm_challenge_response.write_to(&mut buffer)?; // 8 bytes
    message_fields.nt_challenge_response.write_to(&mut buffer)?; // 8 bytes
    message_fields.domain_name.write_to(&mut buffer)?; // 8 bytes
    message_fields.user_name.write_to(&mut buffer)?; // 8 bytes
    message_fields.workstation.write_to(&mut buffer)?; // 8 bytes
    message_fields.encrypted_random_session_key.write_to(&mut buffer)?; // 8 bytes
    buffer.write_u32::<LittleEndian>(negotiate_flags.bits())?; // 4 bytes

    message_fields.domain_name.write_buffer_to(&mut buffer)?;
    message_fields.user_name.write_buffer_to(&mut buffer)?;
    message_fields.workstation.write_buffer_to(&mut buffer)?;
    message_fields.lm_challenge_response.write_buffer_to(&mut buffer)?;
    message_fields.nt_challenge_response.write_buffer_to(&mut buffer)?;
    message_fields.encrypted_random_session_key.write_buffer_to(&mut buffer)?;

    context.flags = negotiate_flags;
    context.session_key = responses.session_key;
    context.mac_key = responses.mac_key;
    context.state = NtlmState::Completion;

    debug!(anonymous = context.credentials.is_anonymous(), flags = ?negotiate_flags, "AUTHENTICATE written");

    Ok(buffer)
}
