//! SPNEGO token builders. Every element is encoded child first and wrapped by its parent.

use crate::ber::{self, sizeof_tlv};
use crate::negotiate::NegResult;
use crate::{oids, Error, ErrorKind, Result};

/// Size of a complete negTokenInit, computed from the inside out.
pub(crate) fn neg_token_init_len(mech_types: &[&[u8]], mech_token_len: Option<usize>) -> usize {
    let list_len: usize = mech_types.iter().map(|oid| sizeof_tlv(oid.len())).sum();
    let mech_types_len = sizeof_tlv(sizeof_tlv(list_len));
    let mech_token_len = mech_token_len.map_or(0, |len| sizeof_tlv(sizeof_tlv(len)));
    let init_len = sizeof_tlv(sizeof_tlv(mech_types_len + mech_token_len));

    sizeof_tlv(sizeof_tlv(oids::SPNEGO.len()) + init_len)
}

/// Builds `[APPLICATION 0] { SPNEGO OID, [0] NegTokenInit { [0] mechTypes, [2] mechToken } }`.
///
/// Fails with [`ErrorKind::BufferTooSmall`] when the token would exceed `max_len`.
pub(crate) fn generate_neg_token_init(
    mech_types: &[&[u8]],
    mech_token: Option<&[u8]>,
    max_len: usize,
) -> Result<Vec<u8>> {
    let required = neg_token_init_len(mech_types, mech_token.map(<[u8]>::len));
    if required > max_len {
        return Err(Error::new(
            ErrorKind::BufferTooSmall,
            format!("negTokenInit needs {required} bytes but only {max_len} are available"),
        ));
    }

    let mut mech_list = Vec::new();
    for oid in mech_types {
        ber::write_oid(&mut mech_list, oid)?;
    }
    let mech_list = ber::wrap(ber::SEQUENCE, &mech_list)?;
    let mut fields = ber::wrap(ber::contextual_tag(0), &mech_list)?;

    if let Some(token) = mech_token {
        let mut octet_string = Vec::new();
        ber::write_octet_string(&mut octet_string, token)?;
        fields.extend_from_slice(&ber::wrap(ber::contextual_tag(2), &octet_string)?);
    }

    let neg_token_init = ber::wrap(ber::SEQUENCE, &fields)?;
    let neg_token_init = ber::wrap(ber::contextual_tag(0), &neg_token_init)?;

    let mut body = Vec::new();
    ber::write_oid(&mut body, oids::SPNEGO)?;
    body.extend_from_slice(&neg_token_init);

    let token = ber::wrap(ber::APPLICATION_0, &body)?;
    debug_assert_eq!(token.len(), required);

    Ok(token)
}

/// Builds `[1] NegTokenTarg { [0] negResult, [1] supportedMech, [2] responseToken }`, leaving out
/// absent fields.
pub(crate) fn generate_neg_token_targ(
    neg_result: Option<NegResult>,
    supported_mech: Option<&[u8]>,
    response_token: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let mut fields = Vec::new();

    if let Some(neg_result) = neg_result {
        let mut enumerated = Vec::new();
        ber::write_enumerated(&mut enumerated, neg_result as u8)?;
        fields.extend_from_slice(&ber::wrap(ber::contextual_tag(0), &enumerated)?);
    }

    if let Some(oid) = supported_mech {
        let mut mech = Vec::new();
        ber::write_oid(&mut mech, oid)?;
        fields.extend_from_slice(&ber::wrap(ber::contextual_tag(1), &mech)?);
    }

    if let Some(token) = response_token {
        let mut octet_string = Vec::new();
        ber::write_octet_string(&mut octet_string, token)?;
        fields.extend_from_slice(&ber::wrap(ber::contextual_tag(2), &octet_string)?);
    }

    let neg_token_targ = ber::wrap(ber::SEQUENCE, &fields)?;

    Ok(ber::wrap(ber::contextual_tag(1), &neg_token_targ)?)
}
