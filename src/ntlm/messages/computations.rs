use crate::crypter::{self, now_file_time_timestamp};
use crate::crypto::{fold_key, HASH_SIZE};
use crate::negotiate::ServerConfig;
use crate::ntlm::messages::av_pair::AvPair;
use crate::ntlm::{AuthSession, V1_RESPONSE_SIZE};
use crate::policy::SecurityLevel;
use crate::{utils, Credentials, Error, ErrorKind, PasswordEncryptor, Result, Secret};

/// Number of LM response bytes mixed into NTLM2 session keys.
const LM_SALT_SIZE: usize = 8;

/// Responses and keys the client puts into AUTHENTICATE.
#[derive(Debug, Default)]
pub(super) struct ClientResponses {
    pub lm: Vec<u8>,
    pub nt: Vec<u8>,
    pub session_key: Option<Secret<Vec<u8>>>,
    pub mac_key: Option<Secret<Vec<u8>>>,
}

impl ClientResponses {
    /// Empty responses, no keys.
    pub(super) fn anonymous() -> Self {
        Self::default()
    }
}

pub(super) fn get_challenge_target_info(config: &ServerConfig) -> Result<Vec<u8>> {
    let av_pairs = [
        AvPair::NbDomainName(utils::string_to_utf16(&config.netbios_domain)),
        AvPair::NbComputerName(utils::string_to_utf16(&config.netbios_host)),
        AvPair::DnsDomainName(utils::string_to_utf16(&config.dns_domain)),
        AvPair::DnsComputerName(utils::string_to_utf16(&config.dns_host)),
        AvPair::EOL,
    ];

    Ok(AvPair::list_to_buffer(&av_pairs)?)
}

/// The server's timestamp if the target information carries one.
pub(super) fn get_timestamp(target_info: &[u8]) -> Result<Option<u64>> {
    let av_pairs = AvPair::buffer_to_av_pairs(target_info)?;

    Ok(av_pairs.iter().find_map(|av_pair| match av_pair {
        AvPair::Timestamp(timestamp) => Some(*timestamp),
        _ => None,
    }))
}

/// Runs the password encryptor for the level.
///
/// For LMv2 paired with NTLMv1 (NTLM2 session response) the challenge is folded with the first
/// 16 bytes of the LMv2 response and the encryptor runs a second time; the session key is then
/// derived from both MAC keys. Otherwise the MAC key doubles as the session key.
pub(super) fn compute_client_responses(
    encryptor: &dyn PasswordEncryptor,
    credentials: &Credentials,
    level: &SecurityLevel,
    server_challenge: &[u8],
    target_info: Option<&[u8]>,
    timestamp: Option<u64>,
) -> Result<ClientResponses> {
    let timestamp = match timestamp {
        Some(timestamp) => timestamp,
        None => now_file_time_timestamp()?,
    };

    let encrypted =
        crypter::encrypt_for_level(encryptor, credentials, level, server_challenge, target_info, timestamp)?;

    if !level.is_ntlm2_session() {
        return Ok(ClientResponses {
            lm: encrypted.first,
            nt: encrypted.second,
            session_key: Some(encrypted.mac_key.clone()),
            mac_key: Some(encrypted.mac_key),
        });
    }

    let lm_prefix = encrypted.first.get(..HASH_SIZE).ok_or_else(|| {
        Error::new(
            ErrorKind::InternalError,
            format!(
                "LMv2 response is {} bytes long, at least {HASH_SIZE} are needed",
                encrypted.first.len()
            ),
        )
    })?;
    let folded_challenge = fold_key(server_challenge, lm_prefix);

    let rederived =
        crypter::encrypt_for_level(encryptor, credentials, level, &folded_challenge, target_info, timestamp)?;
    let session_key = Secret::new(
        encryptor.ntlmv2_session_key(rederived.mac_key.as_ref(), encrypted.mac_key.as_ref())?,
    );

    debug!("NTLM2 session response computed");

    Ok(ClientResponses {
        lm: rederived.first,
        nt: rederived.second,
        session_key: Some(session_key.clone()),
        mac_key: Some(session_key),
    })
}

/// Applies NTLM2 session security to the server session after AUTHENTICATE.
///
/// Only v1-sized responses qualify. The key becomes `MD5(key || LM[..8])` truncated to its
/// previous length and the signing nonce, if tracked, becomes `key || LM[..8]`.
pub(super) fn rederive_session_key(session: &mut AuthSession, lm: &[u8], nt: &[u8]) -> bool {
    if lm.len() != V1_RESPONSE_SIZE || nt.len() != V1_RESPONSE_SIZE {
        return false;
    }

    let salt = &lm[..LM_SALT_SIZE];
    let original = session.session_key.as_ref().clone();

    if let Some(nonce) = session.signing_nonce.as_mut() {
        *nonce = Secret::new([original.as_slice(), salt].concat());
    }

    if !original.is_empty() {
        session.session_key = Secret::new(fold_key(&original, salt));
    }

    true
}
