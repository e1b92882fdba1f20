//! SPNEGO token parsers. Returned slices borrow from the input blob.

use std::io;

use num_traits::FromPrimitive;

use crate::ber;
use crate::negotiate::NegResult;
use crate::{oids, Error, ErrorKind, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NegTokenInit<'a> {
    pub mech_types: Vec<&'a [u8]>,
    pub mech_token: Option<&'a [u8]>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NegTokenTarg<'a> {
    pub neg_result: Option<NegResult>,
    pub supported_mech: Option<&'a [u8]>,
    pub response_token: Option<&'a [u8]>,
    pub mech_list_mic: Option<&'a [u8]>,
}

/// Checks for `[APPLICATION 0] { SPNEGO OID, ...` without consuming anything.
pub(crate) fn is_spnego_init(blob: &[u8]) -> bool {
    let mut cursor = io::Cursor::new(blob);

    ber::read_expected_tag(&mut cursor, ber::APPLICATION_0).is_ok()
        && ber::read_oid_and_compare(&mut cursor, oids::SPNEGO, false).unwrap_or(false)
}

#[instrument(level = "trace", ret, skip_all)]
pub(crate) fn decode_neg_token_init(blob: &[u8]) -> Result<NegTokenInit<'_>> {
    let mut cursor = io::Cursor::new(blob);

    ber::read_expected_tag(&mut cursor, ber::APPLICATION_0)?;
    if !ber::read_oid_and_compare(&mut cursor, oids::SPNEGO, false)? {
        return Err(Error::new(ErrorKind::InvalidToken, "GSS-API token is not SPNEGO"));
    }

    ber::read_expected_tag(&mut cursor, ber::contextual_tag(0))?;
    let sequence_len = ber::read_expected_tag(&mut cursor, ber::SEQUENCE)?;
    let sequence_end = cursor.position() + sequence_len as u64;

    let mut token = NegTokenInit::default();
    while cursor.position() < sequence_end {
        let (tag, length) = ber::read_any_tag(&mut cursor)?;

        match tag {
            tag if tag == ber::contextual_tag(0) => {
                let list_len = ber::read_expected_tag(&mut cursor, ber::SEQUENCE)?;
                let list_end = cursor.position() + list_len as u64;

                while cursor.position() < list_end {
                    token.mech_types.push(ber::read_oid(&mut cursor)?);
                }
            }
            tag if tag == ber::contextual_tag(2) => {
                let token_len = ber::read_expected_tag(&mut cursor, ber::OCTET_STRING)?;
                token.mech_token = Some(ber::read_slice(&mut cursor, token_len)?);
            }
            // reqFlags, mechListMIC
            _ => ber::skip(&mut cursor, length)?,
        }
    }

    if token.mech_types.is_empty() {
        return Err(Error::new(ErrorKind::InvalidToken, "negTokenInit has no mechanism types"));
    }

    Ok(token)
}

#[instrument(level = "trace", ret, skip_all)]
pub(crate) fn decode_neg_token_targ(blob: &[u8]) -> Result<NegTokenTarg<'_>> {
    let mut cursor = io::Cursor::new(blob);

    ber::read_expected_tag(&mut cursor, ber::contextual_tag(1))?;
    let sequence_len = ber::read_expected_tag(&mut cursor, ber::SEQUENCE)?;
    let sequence_end = cursor.position() + sequence_len as u64;

    let mut token = NegTokenTarg::default();
    while cursor.position() < sequence_end {
        let (tag, length) = ber::read_any_tag(&mut cursor)?;

        match tag {
            tag if tag == ber::contextual_tag(0) => {
                let value = ber::read_enumerated(&mut cursor)?;
                token.neg_result = Some(NegResult::from_u8(value).ok_or_else(|| {
                    Error::new(ErrorKind::InvalidToken, format!("invalid negResult: {value}"))
                })?);
            }
            tag if tag == ber::contextual_tag(1) => {
                token.supported_mech = Some(ber::read_oid(&mut cursor)?);
            }
            tag if tag == ber::contextual_tag(2) => {
                let token_len = ber::read_expected_tag(&mut cursor, ber::OCTET_STRING)?;
                token.response_token = Some(ber::read_slice(&mut cursor, token_len)?);
            }
            tag if tag == ber::contextual_tag(3) => {
                let mic_len = ber::read_expected_tag(&mut cursor, ber::OCTET_STRING)?;
                token.mech_list_mic = Some(ber::read_slice(&mut cursor, mic_len)?);
            }
            _ => ber::skip(&mut cursor, length)?,
        }
    }

    Ok(token)
}
