//! Kerberos glue: GSS-API framing of AP-REQ/AP-REP tokens around an external ticket engine.
//!
//! Tickets are never built or validated here. The client asks a [`TicketExchange`] for a
//! [`TicketContext`] bound to the `cifs/<server>@<REALM>` principal and forwards its tokens; the
//! server hands the received AP-REQ to [`TicketExchange::accept`].

#[cfg(test)]
pub(crate) mod test_engine;
#[cfg(test)]
mod tests;

use std::fmt::Debug;
use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::negotiate::{generators, AuthenticatedIdentity, ClientMechanism, MechanismOutput};
use crate::ntlm::Passwords;
use crate::{ber, oids, Credentials, Error, ErrorKind, Result, Secret, SecurityStatus};

pub const PKG_NAME: &str = "Kerberos";
pub const SERVICE_NAME: &str = "cifs";

pub const AP_REQ_TOKEN_ID: u16 = 0x0100;
pub const AP_REP_TOKEN_ID: u16 = 0x0200;
pub const KRB_ERROR_TOKEN_ID: u16 = 0x0300;

const TOKEN_ID_SIZE: usize = 2;

/// One client-side ticket exchange, created per logon attempt.
pub trait TicketContext: Debug + Send {
    fn is_valid(&self) -> bool;

    /// The AP-REQ for the service.
    fn first_request(&mut self) -> Result<Vec<u8>>;

    /// Processes the server's AP-REP. Returns a further token if the engine needs another leg.
    fn next_request(&mut self, ap_rep: &[u8]) -> Result<Option<Vec<u8>>>;

    fn session_key(&self) -> Option<Vec<u8>>;
}

/// The external Kerberos engine.
pub trait TicketExchange: Debug + Send + Sync {
    /// Called once before a logon that may use Kerberos.
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Called once after that logon, whatever its outcome.
    fn stop(&self) {}

    fn create_context(&self, service_principal: &str, credentials: &Credentials) -> Result<Box<dyn TicketContext>>;

    /// Validates an AP-REQ on the server side.
    fn accept(&self, ap_req: &[u8]) -> Result<AcceptedTicket>;
}

#[derive(Debug, Clone)]
pub struct AcceptedTicket {
    pub identity: AuthenticatedIdentity,
    pub session_key: Secret<Vec<u8>>,
    /// AP-REP for mutual authentication.
    pub ap_rep: Option<Vec<u8>>,
}

/// Builds `cifs/<server>@<REALM>`.
///
/// Without an explicit realm the domain part of a fully qualified `server` is used; a bare host
/// name yields a principal without realm.
pub fn service_principal_name(server: &str, realm: Option<&str>) -> String {
    let realm = realm
        .map(str::to_owned)
        .or_else(|| server.split_once('.').map(|(_, domain)| domain.to_owned()))
        .filter(|realm| !realm.is_empty());

    match realm {
        Some(realm) => format!("{SERVICE_NAME}/{server}@{}", realm.to_uppercase()),
        None => format!("{SERVICE_NAME}/{server}"),
    }
}

/// `[APPLICATION 0] { krb5 OID, token id, token }` as in RFC 4121.
pub(crate) fn wrap_krb_token(oid: &[u8], token_id: u16, token: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    body.try_reserve(ber::sizeof_tlv(oid.len()) + TOKEN_ID_SIZE + token.len())?;

    ber::write_oid(&mut body, oid)?;
    body.write_u16::<BigEndian>(token_id)?;
    body.extend_from_slice(token);

    Ok(ber::wrap(ber::APPLICATION_0, &body)?)
}

fn read_krb_oid(cursor: &mut io::Cursor<&[u8]>) -> Result<&'static [u8]> {
    for oid in [oids::KRB5, oids::MS_KRB5] {
        if ber::read_oid_and_compare(cursor, oid, true)? {
            return Ok(oid);
        }
    }

    Err(Error::new(
        ErrorKind::SecurityPackageNotFound,
        "GSS-API token does not carry a Kerberos 5 mechanism",
    ))
}

/// Strips the RFC 4121 framing and returns the mechanism OID and the inner token.
pub(crate) fn unwrap_krb_token(blob: &[u8], expected_token_id: u16) -> Result<(&'static [u8], &[u8])> {
    let mut cursor = io::Cursor::new(blob);

    let length = ber::read_expected_tag(&mut cursor, ber::APPLICATION_0)?;
    let end = cursor.position() as usize + length;
    let oid = read_krb_oid(&mut cursor)?;
    let token_id = cursor.read_u16::<BigEndian>()?;

    if token_id == KRB_ERROR_TOKEN_ID {
        return Err(Error::new(ErrorKind::LogonDenied, "the server answered with KRB-ERROR"));
    }

    if token_id != expected_token_id {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!("unexpected Kerberos token id: expected 0x{expected_token_id:04X} but got 0x{token_id:04X}"),
        ));
    }

    let start = cursor.position() as usize;
    blob.get(start..end)
        .map(|token| (oid, token))
        .ok_or_else(|| Error::new(ErrorKind::InvalidToken, "truncated Kerberos token"))
}

/// A GSS-API Kerberos token sent without the SPNEGO envelope.
pub fn is_naked_kerberos(blob: &[u8]) -> bool {
    let mut cursor = io::Cursor::new(blob);

    ber::read_expected_tag(&mut cursor, ber::APPLICATION_0).is_ok() && read_krb_oid(&mut cursor).is_ok()
}

/// Client half of the Kerberos mechanism.
#[derive(Debug)]
pub struct KerberosClient {
    context: Box<dyn TicketContext>,
    oid: &'static [u8],
    session_key: Option<Secret<Vec<u8>>>,
}

impl KerberosClient {
    /// `oid` is the Kerberos OID the server offered; it is echoed in the negTokenInit.
    pub fn new(
        exchange: &dyn TicketExchange,
        service_principal: &str,
        credentials: &Credentials,
        oid: &'static [u8],
    ) -> Result<Self> {
        let context = exchange.create_context(service_principal, credentials)?;

        Ok(Self {
            context,
            oid,
            session_key: None,
        })
    }

    /// Size of the negTokenInit that carries an AP-REQ of `token_len` bytes.
    pub fn negotiation_blob_len(&self, token_len: usize) -> usize {
        let krb_token_len = ber::sizeof_tlv(ber::sizeof_tlv(self.oid.len()) + TOKEN_ID_SIZE + token_len);

        generators::neg_token_init_len(&[self.oid, oids::NTLMSSP], Some(krb_token_len))
    }

    fn update_session_key(&mut self) {
        if let Some(key) = self.context.session_key() {
            self.session_key = Some(Secret::new(key));
        }
    }
}

impl ClientMechanism for KerberosClient {
    #[instrument(level = "debug", skip(self))]
    fn generate_first_request(&mut self) -> Result<Vec<u8>> {
        let ap_req = self.context.first_request()?;
        self.update_session_key();

        Ok(ap_req)
    }

    #[instrument(level = "debug", skip_all, fields(len = input.len()))]
    fn generate_next_request(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        let ap_rep = if input.first() == Some(&ber::APPLICATION_0) {
            unwrap_krb_token(input, AP_REP_TOKEN_ID)?.1
        } else {
            input
        };

        let next = self.context.next_request(ap_rep)?;
        self.update_session_key();

        Ok(next)
    }

    fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_ref().map(|key| key.as_ref().as_slice())
    }

    fn mac_key(&self) -> Option<&[u8]> {
        self.session_key()
    }

    fn is_context_valid(&self) -> bool {
        self.context.is_valid()
    }

    /// `[APPLICATION 0] SPNEGO { [0] { [0] { krb5, NTLMSSP }, [2] OCTET STRING { krb5 AP-REQ } } }`
    fn pack_negotiation_blob(&self, token: &[u8], max_len: usize) -> Result<Vec<u8>> {
        let required = self.negotiation_blob_len(token.len());
        if required > max_len {
            return Err(Error::new(
                ErrorKind::BufferTooSmall,
                format!("Kerberos negTokenInit needs {required} bytes but only {max_len} are available"),
            ));
        }

        let krb_token = wrap_krb_token(self.oid, AP_REQ_TOKEN_ID, token)?;

        generators::generate_neg_token_init(&[self.oid, oids::NTLMSSP], Some(&krb_token), max_len)
    }
}

/// Server processing of one GSS-API Kerberos token.
///
/// Reports [`SecurityStatus::CompleteNeeded`] when the engine produced an AP-REP to send back and
/// [`SecurityStatus::ContinueNeeded`] otherwise.
#[instrument(level = "debug", skip_all, fields(len = token.len()))]
pub(crate) fn accept_security_token<'a>(exchange: &dyn TicketExchange, token: &'a [u8]) -> Result<MechanismOutput<'a>> {
    let (oid, ap_req) = unwrap_krb_token(token, AP_REQ_TOKEN_ID)?;
    let accepted = exchange.accept(ap_req)?;

    let (status, response) = match &accepted.ap_rep {
        Some(ap_rep) => (
            SecurityStatus::CompleteNeeded,
            wrap_krb_token(oid, AP_REP_TOKEN_ID, ap_rep)?,
        ),
        None => (SecurityStatus::ContinueNeeded, Vec::new()),
    };

    debug!(user = %accepted.identity.user, domain = %accepted.identity.domain, ?status, "AP-REQ accepted");

    Ok(MechanismOutput {
        status,
        response,
        passwords: Some(Passwords::kerberos()),
        identity: Some(accepted.identity),
        session_key: Some(accepted.session_key),
    })
}
