//! The password-encryption collaborator.
//!
//! Computing LM/NTLM(v2) responses from a password is outside the negotiation logic: the host
//! supplies an implementation of [`PasswordEncryptor`] and the client mechanism calls it with the
//! algorithms of the security level being attempted.

use std::fmt::Debug;

use time::OffsetDateTime;

use crate::policy::{PasswordAlgorithm, SecurityLevel};
use crate::{Credentials, Error, ErrorKind, Result, Secret};

/// Buffers produced by one [`PasswordEncryptor::encrypt`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedCredentials {
    /// Response computed with the level's first algorithm (sent in the LM field).
    pub first: Vec<u8>,
    /// Response computed with the level's second algorithm (sent in the NT field).
    pub second: Vec<u8>,
    /// Key later used for SMB message signing.
    pub mac_key: Secret<Vec<u8>>,
    /// Raw session response material, if the algorithm produces any.
    pub response: Vec<u8>,
}

pub trait PasswordEncryptor: Debug + Send + Sync {
    /// Computes both responses for `key_material` (normally the 8-byte server challenge).
    ///
    /// `target_info` carries the server's AV pair list when the CHALLENGE message had one and
    /// `timestamp` is a FILETIME value for the NTLMv2 blob.
    fn encrypt(
        &self,
        credentials: &Credentials,
        first: PasswordAlgorithm,
        second: PasswordAlgorithm,
        key_material: &[u8],
        target_info: Option<&[u8]>,
        timestamp: u64,
    ) -> Result<EncryptedCredentials>;

    /// Derives the NTLM2 session key from the MAC key of the rederived run and the one produced
    /// with the original challenge.
    fn ntlmv2_session_key(&self, mac_key: &[u8], previous_mac_key: &[u8]) -> Result<Vec<u8>>;
}

pub(crate) fn encrypt_for_level(
    encryptor: &dyn PasswordEncryptor,
    credentials: &Credentials,
    level: &SecurityLevel,
    key_material: &[u8],
    target_info: Option<&[u8]>,
    timestamp: u64,
) -> Result<EncryptedCredentials> {
    if !level.has_algorithms() {
        return Err(Error::new(
            ErrorKind::AlgorithmMismatch,
            format!("cannot encrypt with {:?}/{:?}", level.first, level.second),
        ));
    }

    encryptor.encrypt(
        credentials,
        level.first,
        level.second,
        key_material,
        target_info,
        timestamp,
    )
}

fn convert_to_file_time(end_date: OffsetDateTime) -> Result<u64> {
    let start_date = time::Date::from_calendar_date(1601, time::Month::January, 1)
        .map_err(|err| Error::new(ErrorKind::InternalError, err))?
        .midnight()
        .assume_utc();

    if start_date > end_date {
        return Err(Error::new(
            ErrorKind::InternalError,
            format!(
                "Failed to convert system time to file time, where the start date: {:?}, end date: {:?}",
                start_date, end_date
            ),
        ));
    }

    let duration = end_date - start_date;
    let hundreds_of_nanoseconds = duration.whole_nanoseconds() / 100;

    u64::try_from(hundreds_of_nanoseconds).map_err(|err| Error::new(ErrorKind::InternalError, err))
}

/// Current time as a FILETIME (100ns intervals since 1601-01-01 UTC).
pub(crate) fn now_file_time_timestamp() -> Result<u64> {
    convert_to_file_time(OffsetDateTime::now_utc())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_time_epoch_offset() {
        let unix_epoch = OffsetDateTime::UNIX_EPOCH;

        assert_eq!(convert_to_file_time(unix_epoch).unwrap(), 116_444_736_000_000_000);
    }

    #[test]
    fn refuses_disabled_algorithms() {
        let level = SecurityLevel::new(
            PasswordAlgorithm::None,
            PasswordAlgorithm::Ntlm,
            crate::MechanismMask::NTLMSSP,
        );
        let err = encrypt_for_level(
            &test_encryptor::FixedEncryptor,
            &Credentials::new("user", "DOMAIN", "password"),
            &level,
            &[0; 8],
            None,
            0,
        )
        .unwrap_err();

        assert_eq!(err.error_type, ErrorKind::AlgorithmMismatch);
    }
}
