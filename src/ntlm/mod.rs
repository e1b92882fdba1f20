//! NTLMSSP message handling.
//!
//! The client side builds NEGOTIATE and AUTHENTICATE messages around the responses computed by
//! the [`PasswordEncryptor`]. The server side issues CHALLENGE messages and extracts the client's
//! responses into [`Passwords`]; verifying them is left to the caller.
//!
//! # MSDN
//!
//! * [[MS-NLMP]: NT LAN Manager (NTLM) Authentication Protocol](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-nlmp/b38c36ed-2804-4868-a9ff-8dd3182128e4)

mod messages;

use std::sync::Arc;

use bitflags::bitflags;
use rand::rngs::OsRng;
use rand::RngCore;

pub use self::messages::locate_server_challenge;
pub(crate) use self::messages::{accept_message, is_ntlmssp_message};
use crate::negotiate::{generators, ClientMechanism, Mechanism};
use crate::policy::SecurityLevel;
use crate::{oids, utils, Credentials, Error, ErrorKind, PasswordEncryptor, Result, Secret};

pub const PKG_NAME: &str = "NTLMSSP";
pub const CHALLENGE_SIZE: usize = 8;

/// Size of an LM or NTLM (v1) challenge response.
const V1_RESPONSE_SIZE: usize = 24;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum NtlmState {
    Negotiate,
    Challenge,
    Completion,
}

/// Per-connection state the server dispatcher works on.
///
/// The host creates one per SMB connection, before the first SESSION_SETUP, and keeps it until the
/// connection is torn down.
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// Server challenge sent in the CHALLENGE message.
    pub challenge: [u8; CHALLENGE_SIZE],
    /// Signing/encryption key of the connection. Rederived in place for NTLM2 session security.
    pub session_key: Secret<Vec<u8>>,
    /// Present when the host tracks key material for message signing.
    pub signing_nonce: Option<Secret<Vec<u8>>>,
    flags: NegotiateFlags,
    mechanism: Option<Mechanism>,
}

impl AuthSession {
    /// Creates a session with a random server challenge.
    pub fn new() -> Result<Self> {
        let mut challenge = [0x00; CHALLENGE_SIZE];
        OsRng
            .try_fill_bytes(&mut challenge)
            .map_err(|err| Error::new(ErrorKind::InternalError, format!("cannot generate challenge: {err}")))?;

        Ok(Self::with_challenge(challenge))
    }

    pub fn with_challenge(challenge: [u8; CHALLENGE_SIZE]) -> Self {
        Self {
            challenge,
            session_key: Secret::default(),
            signing_nonce: None,
            flags: NegotiateFlags::empty(),
            mechanism: None,
        }
    }

    /// Sets the connection key that NTLM2 session security rederives.
    pub fn with_session_key(mut self, key: Vec<u8>) -> Self {
        self.session_key = Secret::new(key);
        self
    }

    /// Enables tracking of the signing nonce.
    pub fn with_signing(mut self) -> Self {
        self.signing_nonce = Some(Secret::default());
        self
    }

    /// Flags of the last NEGOTIATE or AUTHENTICATE message received.
    pub fn negotiated_flags(&self) -> NegotiateFlags {
        self.flags
    }

    /// Mechanism selected by the first blob of this connection.
    pub fn mechanism(&self) -> Option<Mechanism> {
        self.mechanism
    }

    pub(crate) fn set_mechanism(&mut self, mechanism: Mechanism) {
        self.mechanism = Some(mechanism);
    }
}

/// Borrowed view of the credentials a client presented.
///
/// All slices point into the security blob passed to the dispatcher. For Kerberos the buffers
/// are empty and `kerberos_authenticated` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Passwords<'a> {
    pub lm: &'a [u8],
    pub ntlm: &'a [u8],
    pub user: &'a [u8],
    pub domain: &'a [u8],
    pub flags: NegotiateFlags,
    pub kerberos_authenticated: bool,
}

impl<'a> Passwords<'a> {
    pub(crate) fn kerberos() -> Self {
        Self {
            lm: &[],
            ntlm: &[],
            user: &[],
            domain: &[],
            flags: NegotiateFlags::empty(),
            kerberos_authenticated: true,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        !self.kerberos_authenticated && self.user.is_empty() && self.ntlm.is_empty()
    }

    /// Whether the client asked for NTLM2 session security.
    pub fn uses_ntlm2_session(&self) -> bool {
        self.flags
            .contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY)
    }

    pub fn user_name(&self) -> String {
        self.decode(self.user)
    }

    pub fn domain_name(&self) -> String {
        self.decode(self.domain)
    }

    fn decode(&self, value: &[u8]) -> String {
        if self.flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE) {
            utils::bytes_to_utf16_string(value)
        } else {
            String::from_utf8_lossy(value).into_owned()
        }
    }
}

/// Client side of one NTLMSSP exchange at a fixed security level.
#[derive(Debug)]
pub struct NtlmClient {
    credentials: Credentials,
    level: SecurityLevel,
    encryptor: Arc<dyn PasswordEncryptor>,
    workstation: Option<String>,

    state: NtlmState,
    flags: NegotiateFlags,

    session_key: Option<Secret<Vec<u8>>>,
    mac_key: Option<Secret<Vec<u8>>>,
}

impl NtlmClient {
    pub fn new(credentials: Credentials, level: SecurityLevel, encryptor: Arc<dyn PasswordEncryptor>) -> Self {
        Self {
            credentials,
            level,
            encryptor,
            workstation: None,
            state: NtlmState::Negotiate,
            flags: NegotiateFlags::empty(),
            session_key: None,
            mac_key: None,
        }
    }

    pub fn with_workstation(mut self, workstation: Option<String>) -> Self {
        self.workstation = workstation;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.state == NtlmState::Completion
    }
}

impl ClientMechanism for NtlmClient {
    #[instrument(level = "debug", fields(state = ?self.state), skip(self))]
    fn generate_first_request(&mut self) -> Result<Vec<u8>> {
        messages::client::write_negotiate(self)
    }

    #[instrument(level = "debug", fields(state = ?self.state), skip_all)]
    fn generate_next_request(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.state {
            NtlmState::Challenge => {
                let challenge = messages::client::read_challenge(input)?;
                messages::client::write_authenticate(self, &challenge).map(Some)
            }
            NtlmState::Completion => {
                trace!(len = input.len(), "ignoring token after AUTHENTICATE");

                Ok(None)
            }
            NtlmState::Negotiate => Err(Error::new(
                ErrorKind::OutOfSequence,
                "NTLM client got a token before sending NEGOTIATE",
            )),
        }
    }

    fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_ref().map(|key| key.as_ref().as_slice())
    }

    fn mac_key(&self) -> Option<&[u8]> {
        self.mac_key.as_ref().map(|key| key.as_ref().as_slice())
    }

    fn is_context_valid(&self) -> bool {
        true
    }

    fn pack_negotiation_blob(&self, token: &[u8], max_len: usize) -> Result<Vec<u8>> {
        generators::generate_neg_token_init(&[oids::NTLMSSP], Some(token), max_len)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct NegotiateFlags: u32 {
        /// W-bit
        /// requests 56-bit encryption
        const NTLM_SSP_NEGOTIATE56 = 0x8000_0000;

        /// V-bit
        /// requests explicit key exchange
        const NTLM_SSP_NEGOTIATE_KEY_EXCH = 0x4000_0000;

        /// U-bit
        /// requests an 128 bit session key
        const NTLM_SSP_NEGOTIATE128 = 0x2000_0000;

        /// r1
        const NTLM_SSP_NEGOTIATE_RESERVED1  = 0x1000_0000;

        /// r2
        const NTLM_SSP_NEGOTIATE_RESERVED2 = 0x0800_0000;

        /// r3
        const NTLM_SSP_NEGOTIATE_RESERVED3 = 0x0400_0000;

        /// r6
        const NTLM_SSP_NEGOTIATE_VERSION = 0x0200_0000;

        /// r4
        const NTLM_SSP_NEGOTIATE_RESERVED4 = 0x0100_0000;

        /// S-bit
        const NTLM_SSP_NEGOTIATE_TARGET_INFO = 0x0080_0000;

        /// R
        const NTLM_SSP_NEGOTIATE_REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;

        /// r5
        const NTLM_SSP_NEGOTIATE_RESERVED5 = 0x0020_0000;

        /// Q
        const NTLM_SSP_NEGOTIATE_IDENTIFY = 0x0010_0000;

        /// P-bit
        /// NTLM2 session security
        const NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY = 0x0008_0000;

        /// r6
        const NTLM_SSP_NEGOTIATE_RESERVED6 = 0x0004_0000;

        /// O
        const NTLM_SSP_NEGOTIATE_TARGET_TYPE_SERVER = 0x0002_0000;

        /// N
        const NTLM_SSP_NEGOTIATE_TARGET_TYPE_DOMAIN = 0x0001_0000;

        /// M-bit
        /// requests a signature block
        const NTLM_SSP_NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;

        /// r7
        const NTLM_SSP_NEGOTIATE_RESERVED7 = 0x0000_4000;

        /// L-bit
        const NTLM_SSP_NEGOTIATE_WORKSTATION_SUPPLIED = 0x0000_2000;

        /// K-bit
        const NTLM_SSP_NEGOTIATE_DOMAIN_SUPPLIED = 0x0000_1000;

        /// J
        const NTLM_SSP_NEGOTIATE_ANONYMOUS = 0x0000_0800;

        /// r8
        const NTLM_SSP_NEGOTIATE_RESERVED8 = 0x0000_0400;

        /// H-bit
        const NTLM_SSP_NEGOTIATE_NTLM = 0x0000_0200;

        /// r9
        const NTLM_SSP_NEGOTIATE_RESERVED9 = 0x0000_0100;

        /// G-bit
        const NTLM_SSP_NEGOTIATE_LM_KEY = 0x0000_0080;

        /// F
        const NTLM_SSP_NEGOTIATE_DATAGRAM = 0x0000_0040;

        /// E-bit
        /// session key negotiation with message confidentiality
        const NTLM_SSP_NEGOTIATE_SEAL = 0x0000_0020;

        /// D-bit
        const NTLM_SSP_NEGOTIATE_SIGN = 0x0000_0010;

        /// r10
        const NTLM_SSP_NEGOTIATE_SIGN_RESERVED10 = 0x0000_0008;

        /// C-bit
        const NTLM_SSP_NEGOTIATE_REQUEST_TARGET = 0x0000_0004;

        /// B-bit
        const NTLM_SSP_NEGOTIATE_OEM = 0x0000_0002;

        /// A-bit
        const NTLM_SSP_NEGOTIATE_UNICODE = 0x0000_0001;
    }
}
