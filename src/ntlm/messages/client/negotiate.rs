use byteorder::{LittleEndian, WriteBytesExt};

use crate::ntlm::messages::{write_ntlm_header, MessageFields, MessageTypes};
use crate::ntlm::{NegotiateFlags, NtlmClient, NtlmState};
use crate::{Error, ErrorKind, Result};

pub(super) const HEADER_SIZE: usize = 32;

struct NegotiateMessageFields {
    domain_name: MessageFields,
    workstation: MessageFields,
}

impl NegotiateMessageFields {
    fn new(offset: u32) -> Self {
        let domain_name = MessageFields::new().at(offset);
        let workstation = MessageFields::new().after(&domain_name);

        NegotiateMessageFields {
            domain_name,
            workstation,
        }
    }

    fn data_len(&self) -> usize {
        self.workstation.end() as usize
    }
}

fn check_state(state: NtlmState) -> Result<()> {
    if state != NtlmState::Negotiate {
        Err(Error::new(
            ErrorKind::OutOfSequence,
            "Write negotiate was fired but the state is not a Negotiate",
        ))
    } else {
        Ok(())
    }
}

/// Builds the 32-byte NEGOTIATE message. Domain and workstation are sent empty.
pub(crate) fn write_negotiate(context: &mut NtlmClient) -> Result<Vec<u8>> {
    check_state(context.state)?;

    let negotiate_flags = get_flags();
    let message_fields = NegotiateMessageFields::new(HEADER_SIZE as u32);

    let mut buffer = Vec::with_capacity(message_fields.data_len());
    write_ntlm_header(&mut buffer, MessageTypes::Negotiate)?;
    buffer.write_u32::<LittleEndian>(negotiate_flags.bits())?; // negotiate flags 4 bytes
    message_fields.domain_name.write_to(&mut buffer)?; // domain name 8 bytes
    message_fields.workstation.write_to(&mut buffer)?; // workstation 8 bytes
    message_fields.domain_name.write_buffer_to(&mut buffer)?;
    message_fields.workstation.write_buffer_to(&mut buffer)?;

    context.flags = negotiate_flags;
    context.state = NtlmState::Challenge;

    Ok(buffer)
}

fn get_flags() -> NegotiateFlags {
    NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_OEM
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_REQUEST_TARGET
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_SIGN
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_NTLM
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_ALWAYS_SIGN
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY
        | NegotiateFlags::NTLM_SSP_NEGOTIATE128
        | NegotiateFlags::NTLM_SSP_NEGOTIATE56
}
