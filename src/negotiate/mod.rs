//! SPNEGO negotiation: mechanism selection, the client logon driver and the server dispatcher.

pub(crate) mod client;
mod config;
pub(crate) mod extractors;
pub(crate) mod generators;
pub(crate) mod server;

use std::fmt::Debug;

use num_derive::{FromPrimitive, ToPrimitive};
use oid::ObjectIdentifier;
use serde::{Deserialize, Serialize};

pub use self::client::{
    NegotiateClient, NegotiationOutcome, SecurityContext, SessionKeys, Transport, TransportError,
    MAX_NEGOTIATION_RESTARTS,
};
pub use self::config::{NegotiateConfig, ServerConfig, DEFAULT_MAX_BLOB_SIZE};
pub use self::server::ServerDispatcher;
use crate::kerberos::KerberosClient;
use crate::ntlm::{NtlmClient, Passwords};
use crate::policy::MechanismMask;
use crate::{kerberos, ntlm, oids, Result, Secret, SecurityStatus};

pub const PKG_NAME: &str = "Negotiate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mechanism {
    Ntlmssp,
    Kerberos,
}

impl Mechanism {
    pub fn descriptor(self) -> &'static MechanismDescriptor {
        match self {
            Mechanism::Kerberos => &MECHANISMS[0],
            Mechanism::Ntlmssp => &MECHANISMS[1],
        }
    }
}

/// Static description of a negotiable mechanism.
#[derive(Debug)]
pub struct MechanismDescriptor {
    pub name: &'static str,
    pub mechanism: Mechanism,
    /// OID put first into outgoing mechanism lists.
    pub oid: &'static [u8],
    /// Another OID the mechanism answers to.
    pub alternate_oid: Option<&'static [u8]>,
    pub mask: MechanismMask,
}

impl MechanismDescriptor {
    pub fn matches(&self, oid: &[u8]) -> bool {
        self.oid == oid || self.alternate_oid == Some(oid)
    }

    /// The first of this mechanism's OIDs that the server listed in its negTokenInit.
    pub fn offered_oid(&self, server_blob: &[u8]) -> Option<&'static [u8]> {
        [Some(self.oid), self.alternate_oid]
            .into_iter()
            .flatten()
            .find(|oid| oids::blob_has_mech_type(server_blob, oid))
    }
}

/// All mechanisms, in client preference order.
pub static MECHANISMS: [MechanismDescriptor; 2] = [
    MechanismDescriptor {
        name: kerberos::PKG_NAME,
        mechanism: Mechanism::Kerberos,
        oid: oids::MS_KRB5,
        alternate_oid: Some(oids::KRB5),
        mask: MechanismMask::KERBEROS,
    },
    MechanismDescriptor {
        name: ntlm::PKG_NAME,
        mechanism: Mechanism::Ntlmssp,
        oid: oids::NTLMSSP,
        alternate_oid: None,
        mask: MechanismMask::NTLMSSP,
    },
];

pub fn find_mechanism(oid: &[u8]) -> Option<&'static MechanismDescriptor> {
    MECHANISMS.iter().find(|descriptor| descriptor.matches(oid))
}

/// Client half of a security mechanism as driven by [`NegotiateClient`].
pub trait ClientMechanism: Debug + Send {
    /// Produces the mechanism's first token.
    fn generate_first_request(&mut self) -> Result<Vec<u8>>;

    /// Consumes a server token. `None` means the mechanism has nothing more to send.
    fn generate_next_request(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>>;

    fn session_key(&self) -> Option<&[u8]>;

    fn mac_key(&self) -> Option<&[u8]>;

    fn is_context_valid(&self) -> bool;

    /// Wraps the first token into a SPNEGO negTokenInit no longer than `max_len` bytes.
    fn pack_negotiation_blob(&self, token: &[u8], max_len: usize) -> Result<Vec<u8>>;
}

#[derive(Debug)]
pub enum MechanismContext {
    Ntlm(NtlmClient),
    Kerberos(KerberosClient),
}

impl MechanismContext {
    pub fn protocol_name(&self) -> &'static str {
        match self {
            MechanismContext::Ntlm(_) => ntlm::PKG_NAME,
            MechanismContext::Kerberos(_) => kerberos::PKG_NAME,
        }
    }
}

impl ClientMechanism for MechanismContext {
    fn generate_first_request(&mut self) -> Result<Vec<u8>> {
        match self {
            MechanismContext::Ntlm(ntlm) => ntlm.generate_first_request(),
            MechanismContext::Kerberos(kerberos) => kerberos.generate_first_request(),
        }
    }

    fn generate_next_request(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            MechanismContext::Ntlm(ntlm) => ntlm.generate_next_request(input),
            MechanismContext::Kerberos(kerberos) => kerberos.generate_next_request(input),
        }
    }

    fn session_key(&self) -> Option<&[u8]> {
        match self {
            MechanismContext::Ntlm(ntlm) => ntlm.session_key(),
            MechanismContext::Kerberos(kerberos) => kerberos.session_key(),
        }
    }

    fn mac_key(&self) -> Option<&[u8]> {
        match self {
            MechanismContext::Ntlm(ntlm) => ntlm.mac_key(),
            MechanismContext::Kerberos(kerberos) => kerberos.mac_key(),
        }
    }

    fn is_context_valid(&self) -> bool {
        match self {
            MechanismContext::Ntlm(ntlm) => ntlm.is_context_valid(),
            MechanismContext::Kerberos(kerberos) => kerberos.is_context_valid(),
        }
    }

    fn pack_negotiation_blob(&self, token: &[u8], max_len: usize) -> Result<Vec<u8>> {
        match self {
            MechanismContext::Ntlm(ntlm) => ntlm.pack_negotiation_blob(token, max_len),
            MechanismContext::Kerberos(kerberos) => kerberos.pack_negotiation_blob(token, max_len),
        }
    }
}

/// State of a client [`SecurityContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiateStatus {
    /// No mechanism selected yet.
    #[default]
    NotStarted,
    /// Context created, nothing sent.
    AwaitingFirst,
    Continue,
    Success,
    Denied,
    Failed,
}

impl NegotiateStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NegotiateStatus::Success | NegotiateStatus::Denied | NegotiateStatus::Failed
        )
    }
}

/// `negResult` of a negTokenTarg.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum NegResult {
    AcceptCompleted = 0,
    AcceptIncomplete = 1,
    Reject = 2,
    RequestMic = 3,
}

/// Names established by a ticket exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    pub user: String,
    pub domain: String,
}

/// Result of one server-side mechanism step.
#[derive(Debug)]
pub struct MechanismOutput<'a> {
    /// [`SecurityStatus::CompleteNeeded`] once the client's credentials are available.
    pub status: SecurityStatus,
    /// Blob to send back to the client. May be empty.
    pub response: Vec<u8>,
    pub passwords: Option<Passwords<'a>>,
    pub identity: Option<AuthenticatedIdentity>,
    pub session_key: Option<Secret<Vec<u8>>>,
}

impl<'a> MechanismOutput<'a> {
    pub(crate) fn continue_needed(response: Vec<u8>) -> Self {
        Self {
            status: SecurityStatus::ContinueNeeded,
            response,
            passwords: None,
            identity: None,
            session_key: None,
        }
    }
}

/// Dotted form of a mechanism OID, for logs.
pub(crate) fn mech_name(oid: &[u8]) -> String {
    let dotted = match ObjectIdentifier::try_from(oid) {
        Ok(oid) => Into::<String>::into(oid),
        Err(_) => format!("invalid OID {oid:02X?}"),
    };

    match find_mechanism(oid) {
        Some(descriptor) => format!("{} ({dotted})", descriptor.name),
        None => dotted,
    }
}
