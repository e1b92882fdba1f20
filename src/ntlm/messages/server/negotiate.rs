use byteorder::{LittleEndian, ReadBytesExt};

use crate::ntlm::messages::{check_header_size, read_header_fields, read_ntlm_header, FieldDescriptor, MessageTypes};
use crate::ntlm::{AuthSession, NegotiateFlags};
use crate::{Error, ErrorKind, Result};

/// Signature, type and flags. Domain and workstation fields are optional.
const MIN_HEADER_SIZE: usize = 16;
const HEADER_SIZE: usize = 32;

pub(super) fn read_negotiate(session: &mut AuthSession, message: &[u8]) -> Result<()> {
    check_header_size(message, MIN_HEADER_SIZE, MessageTypes::Negotiate)?;
    read_ntlm_header(message, MessageTypes::Negotiate)?;

    let mut cursor = read_header_fields(message);
    let negotiate_flags =
        NegotiateFlags::from_bits(cursor.read_u32::<LittleEndian>()?).unwrap_or_else(NegotiateFlags::empty);

    if !negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_NTLM) {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            "Negotiate flags do not contain the necessary flags",
        ));
    }

    if message.len() >= HEADER_SIZE {
        let domain_name = FieldDescriptor::read_from(&mut cursor)?;
        let workstation = FieldDescriptor::read_from(&mut cursor)?;

        domain_name.slice(message, "domain name")?;
        workstation.slice(message, "workstation")?;
    }

    session.flags = negotiate_flags;

    Ok(())
}
