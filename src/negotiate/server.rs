use std::sync::Arc;

use super::extractors::{decode_neg_token_init, decode_neg_token_targ, is_spnego_init};
use super::generators::{generate_neg_token_init, generate_neg_token_targ};
use super::{mech_name, Mechanism, MechanismDescriptor, MechanismOutput, NegResult, ServerConfig, MECHANISMS};
use crate::kerberos::{self, TicketExchange};
use crate::ntlm::{self, AuthSession};
use crate::{ber, Error, ErrorKind, Result, SecurityStatus};

/// Server side of SPNEGO: routes each inbound security blob to the selected mechanism and wraps
/// its answer.
///
/// Credential verification stays with the caller: a blob whose credentials were extracted comes
/// back with [`SecurityStatus::CompleteNeeded`].
#[derive(Debug, Clone)]
pub struct ServerDispatcher {
    config: ServerConfig,
    ticket_exchange: Option<Arc<dyn TicketExchange>>,
}

impl ServerDispatcher {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            ticket_exchange: None,
        }
    }

    /// Enables Kerberos, if the configuration allows it.
    pub fn with_ticket_exchange(mut self, ticket_exchange: Arc<dyn TicketExchange>) -> Self {
        self.ticket_exchange = Some(ticket_exchange);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn enabled_mechanisms(&self) -> impl Iterator<Item = &'static MechanismDescriptor> + '_ {
        MECHANISMS.iter().filter(move |descriptor| self.is_enabled(descriptor.mechanism))
    }

    fn is_enabled(&self, mechanism: Mechanism) -> bool {
        self.config.mechanisms.contains(mechanism.descriptor().mask)
            && (mechanism != Mechanism::Kerberos || self.ticket_exchange.is_some())
    }

    fn check_enabled(&self, mechanism: Mechanism) -> Result<()> {
        if self.is_enabled(mechanism) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::SecurityPackageNotFound,
                format!("{} is not enabled on this server", mechanism.descriptor().name),
            ))
        }
    }

    /// The negTokenInit advertised in the NEGOTIATE response, listing every enabled mechanism OID.
    pub fn negotiate_token(&self) -> Result<Vec<u8>> {
        let mech_types: Vec<&[u8]> = self
            .enabled_mechanisms()
            .flat_map(|descriptor| [Some(descriptor.oid), descriptor.alternate_oid])
            .flatten()
            .collect();

        if mech_types.is_empty() {
            return Err(Error::new(
                ErrorKind::SecurityPackageNotFound,
                "no mechanism is enabled on this server",
            ));
        }

        generate_neg_token_init(&mech_types, None, usize::MAX)
    }

    /// Processes one SESSION_SETUP security blob.
    ///
    /// Accepted forms:
    /// * a raw NTLMSSP message, answered without SPNEGO;
    /// * a raw GSS-API Kerberos token, answered without SPNEGO;
    /// * a negTokenInit, which selects the mechanism for the connection;
    /// * a negTokenTarg, which continues with the mechanism selected earlier on `session`.
    #[instrument(level = "debug", skip_all, fields(len = blob.len()))]
    pub fn accept_security_blob<'a>(
        &self,
        session: Option<&mut AuthSession>,
        blob: &'a [u8],
    ) -> Result<MechanismOutput<'a>> {
        let Some(&tag) = blob.first() else {
            return Err(Error::new(ErrorKind::InvalidToken, "empty security blob"));
        };

        if ntlm::is_ntlmssp_message(blob) {
            return self.accept_naked(Mechanism::Ntlmssp, session, blob);
        }

        match tag {
            ber::APPLICATION_0 if is_spnego_init(blob) => self.accept_neg_token_init(session, blob),
            ber::APPLICATION_0 if kerberos::is_naked_kerberos(blob) => {
                self.accept_naked(Mechanism::Kerberos, session, blob)
            }
            tag if tag == ber::contextual_tag(1) => self.accept_neg_token_targ(session, blob),
            tag => Err(Error::new(
                ErrorKind::InvalidToken,
                format!("unexpected security blob tag: 0x{tag:02X}"),
            )),
        }
    }

    fn accept_naked<'a>(
        &self,
        mechanism: Mechanism,
        mut session: Option<&mut AuthSession>,
        token: &'a [u8],
    ) -> Result<MechanismOutput<'a>> {
        self.check_enabled(mechanism)?;

        debug!(?mechanism, "unwrapped mechanism token");

        if let Some(session) = session.as_deref_mut() {
            session.set_mechanism(mechanism);
        }

        self.call_mechanism(mechanism, session, token)
    }

    fn accept_neg_token_init<'a>(
        &self,
        mut session: Option<&mut AuthSession>,
        blob: &'a [u8],
    ) -> Result<MechanismOutput<'a>> {
        let init = decode_neg_token_init(blob)?;

        let (position, oid, descriptor) = init
            .mech_types
            .iter()
            .enumerate()
            .find_map(|(position, oid)| {
                self.enabled_mechanisms()
                    .find(|descriptor| descriptor.matches(oid))
                    .map(|descriptor| (position, *oid, descriptor))
            })
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::SecurityPackageNotFound,
                    format!(
                        "none of the client mechanisms is supported: {}",
                        init.mech_types.iter().map(|oid| mech_name(oid)).collect::<Vec<_>>().join(", ")
                    ),
                )
            })?;

        debug!(mechanism = descriptor.name, oid = %mech_name(oid), "mechanism selected");

        if let Some(session) = session.as_deref_mut() {
            session.set_mechanism(descriptor.mechanism);
        }

        // The optimistic token belongs to the client's first choice.
        match init.mech_token.filter(|_| position == 0) {
            Some(token) => {
                let output = self.call_mechanism(descriptor.mechanism, session, token)?;

                wrap_output(output, Some(oid))
            }
            None => Ok(MechanismOutput::continue_needed(generate_neg_token_targ(
                Some(NegResult::AcceptIncomplete),
                Some(oid),
                None,
            )?)),
        }
    }

    fn accept_neg_token_targ<'a>(
        &self,
        session: Option<&mut AuthSession>,
        blob: &'a [u8],
    ) -> Result<MechanismOutput<'a>> {
        let targ = decode_neg_token_targ(blob)?;

        let session = session.ok_or_else(|| Error::new(ErrorKind::NoContext, "negTokenTarg needs a session"))?;
        let mechanism = session.mechanism().ok_or_else(|| {
            Error::new(
                ErrorKind::NoContext,
                "negTokenTarg received before any mechanism was selected",
            )
        })?;
        self.check_enabled(mechanism)?;

        if let Some(oid) = targ.supported_mech {
            if !mechanism.descriptor().matches(oid) {
                return Err(Error::new(
                    ErrorKind::SecurityPackageNotFound,
                    format!("negTokenTarg names {} but {:?} was selected", mech_name(oid), mechanism),
                ));
            }
        }

        let token = targ
            .response_token
            .ok_or_else(|| Error::new(ErrorKind::InvalidToken, "negTokenTarg carries no response token"))?;

        let output = self.call_mechanism(mechanism, Some(session), token)?;

        wrap_output(output, None)
    }

    fn call_mechanism<'a>(
        &self,
        mechanism: Mechanism,
        session: Option<&mut AuthSession>,
        token: &'a [u8],
    ) -> Result<MechanismOutput<'a>> {
        match mechanism {
            Mechanism::Ntlmssp => ntlm::accept_message(session, &self.config, token),
            Mechanism::Kerberos => {
                let ticket_exchange = self.ticket_exchange.as_deref().ok_or_else(|| {
                    Error::new(ErrorKind::SecurityPackageNotFound, "no Kerberos ticket engine available")
                })?;

                kerberos::accept_security_token(ticket_exchange, token)
            }
        }
    }
}

/// Puts a mechanism answer into a negTokenTarg.
///
/// `negResult` is accept-completed exactly when the mechanism handed over credentials for the
/// caller to verify and accept-incomplete otherwise.
fn wrap_output<'a>(mut output: MechanismOutput<'a>, supported_mech: Option<&[u8]>) -> Result<MechanismOutput<'a>> {
    let neg_result = if output.status == SecurityStatus::CompleteNeeded {
        NegResult::AcceptCompleted
    } else {
        NegResult::AcceptIncomplete
    };

    let response_token = (!output.response.is_empty()).then_some(output.response.as_slice());
    let response = generate_neg_token_targ(Some(neg_result), supported_mech, response_token)?;
    output.response = response;

    Ok(output)
}
