use byteorder::{LittleEndian, ReadBytesExt};

use crate::ntlm::messages::computations::rederive_session_key;
use crate::ntlm::messages::{check_header_size, read_header_fields, read_ntlm_header, FieldDescriptor, MessageTypes};
use crate::ntlm::{AuthSession, NegotiateFlags, Passwords};
use crate::Result;

const HEADER_SIZE: usize = 64;

struct AuthenticateMessageFields {
    lm_challenge_response: FieldDescriptor,
    nt_challenge_response: FieldDescriptor,
    domain_name: FieldDescriptor,
    user_name: FieldDescriptor,
    workstation: FieldDescriptor,
    encrypted_random_session_key: FieldDescriptor,
}

fn read_header(mut buffer: impl std::io::Read) -> Result<(AuthenticateMessageFields, NegotiateFlags)> {
    let message_fields = AuthenticateMessageFields {
        lm_challenge_response: FieldDescriptor::read_from(&mut buffer)?,
        nt_challenge_response: FieldDescriptor::read_from(&mut buffer)?,
        domain_name: FieldDescriptor::read_from(&mut buffer)?,
        user_name: FieldDescriptor::read_from(&mut buffer)?,
        workstation: FieldDescriptor::read_from(&mut buffer)?,
        encrypted_random_session_key: FieldDescriptor::read_from(&mut buffer)?,
    };
    let negotiate_flags =
        NegotiateFlags::from_bits(buffer.read_u32::<LittleEndian>()?).unwrap_or_else(NegotiateFlags::empty);

    Ok((message_fields, negotiate_flags))
}

/// Extracts the client's responses and names. Every slice borrows from `message`.
///
/// With NTLM2 session security and v1-sized responses the session key is rederived.
pub(super) fn read_authenticate<'a>(session: &mut AuthSession, message: &'a [u8]) -> Result<Passwords<'a>> {
    check_header_size(message, HEADER_SIZE, MessageTypes::Authenticate)?;
    read_ntlm_header(message, MessageTypes::Authenticate)?;

    let (message_fields, flags) = read_header(read_header_fields(message))?;

    let lm = message_fields.lm_challenge_response.slice(message, "LM response")?;
    let ntlm = message_fields.nt_challenge_response.slice(message, "NT response")?;
    let domain = message_fields.domain_name.slice(message, "domain name")?;
    let user = message_fields.user_name.slice(message, "user name")?;
    message_fields.workstation.slice(message, "workstation")?;
    message_fields
        .encrypted_random_session_key
        .slice(message, "session key")?;

    session.flags = flags;

    if flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY)
        && rederive_session_key(session, lm, ntlm)
    {
        debug!("session key rederived for NTLM2 session security");
    }

    Ok(Passwords {
        lm,
        ntlm,
        user,
        domain,
        flags,
        kerberos_authenticated: false,
    })
}
