use std::fmt;
use std::sync::Arc;

use super::extractors::decode_neg_token_targ;
use super::generators::generate_neg_token_targ;
use super::{
    mech_name, ClientMechanism, Mechanism, MechanismContext, MechanismDescriptor, NegResult, NegotiateConfig,
    NegotiateStatus, MECHANISMS,
};
use crate::kerberos::{self, KerberosClient, TicketExchange};
use crate::ntlm::NtlmClient;
use crate::policy::{SecurityLevel, SecurityPolicy};
use crate::{Error, ErrorKind, PasswordEncryptor, Result, Secret};

/// How many times a logon starts over after a timeout or signature mismatch.
pub const MAX_NEGOTIATION_RESTARTS: usize = 3;

/// Failure reported by the host's transport callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    SignatureMismatch,
    Failed(String),
}

impl TransportError {
    /// Partial state from a stale round-trip cannot be trusted, so these restart the whole logon.
    pub fn restarts_negotiation(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::SignatureMismatch)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "the server did not answer in time"),
            TransportError::SignatureMismatch => write!(f, "the response signature does not match"),
            TransportError::Failed(reason) => write!(f, "transport failure: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// One SESSION_SETUP round-trip: sends `blob` and returns the server's security blob.
pub trait Transport {
    fn exchange(&mut self, blob: &[u8]) -> std::result::Result<Vec<u8>, TransportError>;
}

/// Caller-visible key slots filled by a successful logon.
#[derive(Debug, Default)]
pub struct SessionKeys {
    pub session_key: Option<Secret<Vec<u8>>>,
    /// Signing key. A key already present is kept.
    pub mac_key: Option<Secret<Vec<u8>>>,
}

impl SessionKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&mut self) {
        self.session_key = None;
        self.mac_key = None;
    }

    fn commit(&mut self, logon: CompletedLogon) {
        self.session_key = logon.session_key;

        if self.mac_key.is_none() {
            self.mac_key = logon.mac_key;
        } else {
            debug!("keeping the MAC key already present");
        }
    }
}

/// Summary of a successful logon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationOutcome {
    pub mechanism: &'static str,
    /// Security level that succeeded.
    pub level: usize,
    /// Transport exchanges made at that level.
    pub round_trips: usize,
    pub restarts: usize,
}

/// One mechanism exchange, wrapped in SPNEGO unless the server offered no security blob.
#[derive(Debug)]
pub struct SecurityContext {
    descriptor: &'static MechanismDescriptor,
    mechanism: MechanismContext,
    status: NegotiateStatus,
    wrapped: bool,
}

impl SecurityContext {
    pub fn new(descriptor: &'static MechanismDescriptor, mechanism: MechanismContext, wrapped: bool) -> Self {
        Self {
            descriptor,
            mechanism,
            status: NegotiateStatus::AwaitingFirst,
            wrapped,
        }
    }

    pub fn status(&self) -> NegotiateStatus {
        self.status
    }

    pub fn mechanism_name(&self) -> &'static str {
        self.mechanism.protocol_name()
    }

    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// Produces the first blob of the exchange, at most `max_len` bytes long.
    pub fn generate_first_blob(&mut self, max_len: usize) -> Result<Vec<u8>> {
        if self.status != NegotiateStatus::AwaitingFirst {
            return Err(Error::new(
                ErrorKind::OutOfSequence,
                format!("first blob requested in {:?} state", self.status),
            ));
        }

        let result = self.first_blob(max_len);
        self.status = match result {
            Ok(_) => NegotiateStatus::Continue,
            Err(_) => NegotiateStatus::Failed,
        };

        result
    }

    fn first_blob(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let token = self.mechanism.generate_first_request()?;

        if self.wrapped {
            return self.mechanism.pack_negotiation_blob(&token, max_len);
        }

        if token.len() > max_len {
            return Err(Error::new(
                ErrorKind::BufferTooSmall,
                format!("{} token needs {} bytes but only {max_len} are available", self.descriptor.name, token.len()),
            ));
        }

        Ok(token)
    }

    /// Consumes the server's reply.
    ///
    /// Returns the next blob to send, or `None` once the context reached
    /// [`NegotiateStatus::Success`] or [`NegotiateStatus::Denied`]. Errors leave the context
    /// [`NegotiateStatus::Failed`].
    pub fn accept_next_blob(&mut self, blob: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.status != NegotiateStatus::Continue {
            return Err(Error::new(
                ErrorKind::OutOfSequence,
                format!("server blob received in {:?} state", self.status),
            ));
        }

        let result = self.next_blob(blob);
        if result.is_err() {
            self.status = NegotiateStatus::Failed;
        }

        result
    }

    fn next_blob(&mut self, blob: &[u8]) -> Result<Option<Vec<u8>>> {
        // Older servers end the exchange with an empty blob instead of accept-completed.
        if blob.is_empty() {
            self.status = NegotiateStatus::Success;

            return Ok(None);
        }

        if !self.wrapped {
            let next = self.mechanism.generate_next_request(blob)?;
            if next.is_none() {
                self.status = NegotiateStatus::Success;
            }

            return Ok(next);
        }

        let reply = decode_neg_token_targ(blob)?;

        if let Some(oid) = reply.supported_mech {
            if !self.descriptor.matches(oid) {
                return Err(Error::new(
                    ErrorKind::SecurityPackageNotFound,
                    format!("server selected {} while {} was offered", mech_name(oid), self.descriptor.name),
                ));
            }
        }

        match reply.neg_result {
            Some(NegResult::Reject) => {
                debug!(mechanism = self.descriptor.name, "server rejected the logon");
                self.status = NegotiateStatus::Denied;

                Ok(None)
            }
            Some(NegResult::AcceptCompleted) => {
                // Mutual authentication token, if any. Nothing is sent back.
                if let Some(token) = reply.response_token {
                    self.mechanism.generate_next_request(token)?;
                }
                self.status = NegotiateStatus::Success;

                Ok(None)
            }
            Some(NegResult::AcceptIncomplete) | Some(NegResult::RequestMic) | None => {
                let next = self
                    .mechanism
                    .generate_next_request(reply.response_token.unwrap_or_default())?
                    .ok_or_else(|| {
                        Error::new(
                            ErrorKind::InvalidToken,
                            format!("server expects more from {} but it has nothing to send", self.descriptor.name),
                        )
                    })?;

                Ok(Some(generate_neg_token_targ(None, None, Some(&next))?))
            }
        }
    }

    fn into_completed(self, round_trips: usize) -> CompletedLogon {
        CompletedLogon {
            mechanism: self.descriptor.name,
            session_key: self.mechanism.session_key().map(|key| Secret::new(key.to_vec())),
            mac_key: self.mechanism.mac_key().map(|key| Secret::new(key.to_vec())),
            round_trips,
        }
    }
}

#[derive(Debug)]
struct CompletedLogon {
    mechanism: &'static str,
    session_key: Option<Secret<Vec<u8>>>,
    mac_key: Option<Secret<Vec<u8>>>,
    round_trips: usize,
}

#[derive(Debug)]
enum LevelAttempt {
    Succeeded(CompletedLogon),
    Denied,
    Failed(Error),
    Restart(TransportError),
    /// Nothing usable at this level.
    Skipped,
}

#[derive(Debug)]
enum Walk {
    Succeeded { level: usize, logon: CompletedLogon },
    Restart(TransportError),
}

/// Client logon driver.
///
/// Walks the security levels of its [`SecurityPolicy`] from the current level down to zero and
/// runs one mechanism exchange per usable level until one succeeds.
#[derive(Debug)]
pub struct NegotiateClient {
    config: NegotiateConfig,
    encryptor: Arc<dyn PasswordEncryptor>,
    ticket_exchange: Option<Arc<dyn TicketExchange>>,
}

impl NegotiateClient {
    pub fn new(config: NegotiateConfig, encryptor: Arc<dyn PasswordEncryptor>) -> Self {
        Self {
            config,
            encryptor,
            ticket_exchange: None,
        }
    }

    /// Enables Kerberos.
    pub fn with_ticket_exchange(mut self, ticket_exchange: Arc<dyn TicketExchange>) -> Self {
        self.ticket_exchange = Some(ticket_exchange);
        self
    }

    pub fn config(&self) -> &NegotiateConfig {
        &self.config
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.config.policy
    }

    pub fn policy_mut(&mut self) -> &mut SecurityPolicy {
        &mut self.config.policy
    }

    /// Runs a complete logon.
    ///
    /// `server_blob` is the security blob of the server's NEGOTIATE response; when it is empty
    /// NTLMSSP is used without SPNEGO. On success the keys are stored in `keys`, whose session key
    /// slot must be empty.
    #[instrument(level = "debug", skip_all, fields(server = %self.config.server_name, blob_len = server_blob.len()))]
    pub fn logon(
        &mut self,
        server_blob: &[u8],
        transport: &mut dyn Transport,
        keys: &mut SessionKeys,
    ) -> Result<NegotiationOutcome> {
        if keys.session_key.is_some() {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                "the session key slot must be empty before a logon",
            ));
        }

        let ticket_exchange = self.start_ticket_exchange(server_blob);

        let mut restarts = 0;
        let result = loop {
            match self.walk_levels(server_blob, transport, ticket_exchange.as_deref()) {
                Ok(Walk::Restart(err)) => {
                    restarts += 1;
                    if restarts > MAX_NEGOTIATION_RESTARTS {
                        break Err(Error::new(
                            ErrorKind::InternalError,
                            format!("negotiation restarted {MAX_NEGOTIATION_RESTARTS} times, last cause: {err}"),
                        ));
                    }

                    warn!(%err, restarts, "restarting negotiation from the top level");
                }
                Ok(Walk::Succeeded { level, logon }) => break Ok((level, logon)),
                Err(err) => break Err(err),
            }
        };

        if let Some(ticket_exchange) = &ticket_exchange {
            ticket_exchange.stop();
        }

        let (level, logon) = result?;
        let outcome = NegotiationOutcome {
            mechanism: logon.mechanism,
            level,
            round_trips: logon.round_trips,
            restarts,
        };
        keys.commit(logon);

        info!(mechanism = outcome.mechanism, level, round_trips = outcome.round_trips, "logon succeeded");

        Ok(outcome)
    }

    /// Initializes the ticket engine when the server offers Kerberos. `None` disables Kerberos
    /// for this logon.
    fn start_ticket_exchange(&self, server_blob: &[u8]) -> Option<Arc<dyn TicketExchange>> {
        let ticket_exchange = self.ticket_exchange.as_ref()?;

        if self.config.credentials.is_anonymous() || Mechanism::Kerberos.descriptor().offered_oid(server_blob).is_none() {
            return None;
        }

        match ticket_exchange.init() {
            Ok(()) => Some(Arc::clone(ticket_exchange)),
            Err(err) => {
                warn!(%err, "Kerberos is unavailable for this logon");

                None
            }
        }
    }

    fn walk_levels(
        &self,
        server_blob: &[u8],
        transport: &mut dyn Transport,
        ticket_exchange: Option<&dyn TicketExchange>,
    ) -> Result<Walk> {
        let policy = &self.config.policy;
        let mut denied = false;
        let mut last_error = None;

        for index in (0..=policy.current_level()).rev() {
            let Some(level) = policy.level(index) else {
                continue;
            };

            match self.attempt_level(index, level, server_blob, transport, ticket_exchange) {
                LevelAttempt::Succeeded(logon) => return Ok(Walk::Succeeded { level: index, logon }),
                LevelAttempt::Restart(err) => return Ok(Walk::Restart(err)),
                LevelAttempt::Denied => denied = true,
                LevelAttempt::Failed(err) if err.error_type == ErrorKind::InsufficientMemory => return Err(err),
                LevelAttempt::Failed(err) => {
                    warn!(level = index, %err, "security level failed");
                    last_error = Some(err);
                }
                LevelAttempt::Skipped => {}
            }
        }

        Err(if denied {
            Error::new(ErrorKind::LogonDenied, "the server denied the logon at every usable level")
        } else if let Some(err) = last_error {
            err
        } else {
            Error::new(
                ErrorKind::SecurityPackageNotFound,
                "no security level matches a mechanism the server offered",
            )
        })
    }

    #[instrument(level = "debug", skip(self, level, server_blob, transport, ticket_exchange))]
    fn attempt_level(
        &self,
        index: usize,
        level: &SecurityLevel,
        server_blob: &[u8],
        transport: &mut dyn Transport,
        ticket_exchange: Option<&dyn TicketExchange>,
    ) -> LevelAttempt {
        if !level.is_enabled() {
            trace!("level disabled");

            return LevelAttempt::Skipped;
        }

        let Some((descriptor, oid)) = select_mechanism(level, server_blob, ticket_exchange.is_some()) else {
            trace!(mechanisms = ?level.mechanisms, "no offered mechanism allowed at this level");

            return LevelAttempt::Skipped;
        };

        let mechanism = match self.create_mechanism(descriptor, oid, level, ticket_exchange) {
            Ok(mechanism) => mechanism,
            Err(err) => return LevelAttempt::Failed(err),
        };

        if !mechanism.is_context_valid() {
            return LevelAttempt::Failed(Error::new(
                ErrorKind::NoCredentials,
                format!("{} context is not valid", descriptor.name),
            ));
        }

        debug!(mechanism = descriptor.name, oid = %mech_name(oid), "mechanism selected");

        let context = SecurityContext::new(descriptor, mechanism, !server_blob.is_empty());
        self.run_context(context, transport)
    }

    fn create_mechanism(
        &self,
        descriptor: &'static MechanismDescriptor,
        oid: &'static [u8],
        level: &SecurityLevel,
        ticket_exchange: Option<&dyn TicketExchange>,
    ) -> Result<MechanismContext> {
        match descriptor.mechanism {
            Mechanism::Ntlmssp => Ok(MechanismContext::Ntlm(
                NtlmClient::new(self.config.credentials.clone(), *level, Arc::clone(&self.encryptor))
                    .with_workstation(self.config.workstation.clone()),
            )),
            Mechanism::Kerberos => {
                let ticket_exchange = ticket_exchange.ok_or_else(|| {
                    Error::new(ErrorKind::SecurityPackageNotFound, "no Kerberos ticket engine available")
                })?;
                let service_principal =
                    kerberos::service_principal_name(&self.config.server_name, self.config.realm.as_deref());

                Ok(MechanismContext::Kerberos(KerberosClient::new(
                    ticket_exchange,
                    &service_principal,
                    &self.config.credentials,
                    oid,
                )?))
            }
        }
    }

    fn run_context(&self, mut context: SecurityContext, transport: &mut dyn Transport) -> LevelAttempt {
        let mut blob = match context.generate_first_blob(self.config.max_blob_size) {
            Ok(blob) => blob,
            Err(err) => return LevelAttempt::Failed(err),
        };

        let mut round_trips = 0;
        loop {
            let reply = match transport.exchange(&blob) {
                Ok(reply) => reply,
                Err(err) if err.restarts_negotiation() => return LevelAttempt::Restart(err),
                Err(err) => return LevelAttempt::Failed(Error::new(ErrorKind::InternalError, err)),
            };
            round_trips += 1;

            trace!(round_trips, len = reply.len(), "server blob received");

            match context.accept_next_blob(&reply) {
                Ok(Some(next)) => blob = next,
                Ok(None) => {
                    return match context.status() {
                        NegotiateStatus::Success => LevelAttempt::Succeeded(context.into_completed(round_trips)),
                        NegotiateStatus::Denied => LevelAttempt::Denied,
                        status => LevelAttempt::Failed(Error::new(
                            ErrorKind::InternalError,
                            format!("exchange stopped in {status:?} state"),
                        )),
                    };
                }
                Err(err) => return LevelAttempt::Failed(err),
            }
        }
    }
}

/// Picks the most preferred mechanism allowed by `level` and offered by the server.
///
/// Without a server blob only NTLMSSP is possible, sent without SPNEGO.
fn select_mechanism(
    level: &SecurityLevel,
    server_blob: &[u8],
    kerberos_available: bool,
) -> Option<(&'static MechanismDescriptor, &'static [u8])> {
    if server_blob.is_empty() {
        let ntlm = Mechanism::Ntlmssp.descriptor();

        return level.mechanisms.contains(ntlm.mask).then_some((ntlm, ntlm.oid));
    }

    MECHANISMS
        .iter()
        .filter(|descriptor| level.mechanisms.contains(descriptor.mask))
        .filter(|descriptor| descriptor.mechanism != Mechanism::Kerberos || kerberos_available)
        .find_map(|descriptor| descriptor.offered_oid(server_blob).map(|oid| (descriptor, oid)))
}
