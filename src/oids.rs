//! Object identifiers of the negotiable mechanisms, as raw DER payload bytes.

use std::io;

use crate::ber;

/// 1.3.6.1.5.5.2
pub const SPNEGO: &[u8] = &[0x2B, 0x06, 0x01, 0x05, 0x05, 0x02];

/// 1.3.6.1.4.1.311.2.2.10
pub const NTLMSSP: &[u8] = &[0x2B, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0A];

/// 1.2.840.113554.1.2.2 (IETF Kerberos 5)
pub const KRB5: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x12, 0x01, 0x02, 0x02];

/// 1.2.840.48018.1.2.2 (Microsoft Kerberos 5, historically mis-encoded by Windows 2000)
pub const MS_KRB5: &[u8] = &[0x2A, 0x86, 0x48, 0x82, 0xF7, 0x12, 0x01, 0x02, 0x02];

/// 1.2.840.113554.1.2.2.3
pub const KRB5_USER_TO_USER: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x12, 0x01, 0x02, 0x02, 0x03];

/// Checks whether a SPNEGO negTokenInit lists `oid` among its mechanism types.
///
/// Returns `false` for anything that is not a well formed negTokenInit as well as when the list is
/// exhausted without a match.
pub fn blob_has_mech_type(blob: &[u8], oid: &[u8]) -> bool {
    match scan_mech_types(blob, oid) {
        Ok(found) => found,
        Err(err) => {
            trace!(%err, "security blob is not a negTokenInit");

            false
        }
    }
}

fn scan_mech_types(blob: &[u8], oid: &[u8]) -> io::Result<bool> {
    let mut cursor = io::Cursor::new(blob);

    ber::read_expected_tag(&mut cursor, ber::APPLICATION_0)?;
    if !ber::read_oid_and_compare(&mut cursor, SPNEGO, false)? {
        return Ok(false);
    }

    ber::read_expected_tag(&mut cursor, ber::contextual_tag(0))?;
    ber::read_expected_tag(&mut cursor, ber::SEQUENCE)?;
    ber::read_expected_tag(&mut cursor, ber::contextual_tag(0))?;
    let list_len = ber::read_expected_tag(&mut cursor, ber::SEQUENCE)?;

    let list_end = cursor.position() + list_len as u64;
    while cursor.position() < list_end {
        if ber::read_oid_and_compare(&mut cursor, oid, false)? {
            return Ok(true);
        }
    }

    Ok(false)
}
