//! A ticket engine that trades readable fake tokens.

use super::{AcceptedTicket, TicketContext, TicketExchange};
use crate::crypto::compute_md5;
use crate::negotiate::AuthenticatedIdentity;
use crate::{Credentials, Error, ErrorKind, Result, Secret};

pub(crate) const FAKE_AP_REP: &[u8] = b"AP-REP";

#[derive(Debug, Default)]
pub(crate) struct FakeTicketExchange {
    pub mutual: bool,
}

impl TicketExchange for FakeTicketExchange {
    fn create_context(&self, service_principal: &str, credentials: &Credentials) -> Result<Box<dyn TicketContext>> {
        Ok(Box::new(FakeTicketContext {
            request: format!("AP-REQ:{}:{service_principal}", credentials.username).into_bytes(),
            session_key: None,
        }))
    }

    fn accept(&self, ap_req: &[u8]) -> Result<AcceptedTicket> {
        let request = std::str::from_utf8(ap_req).map_err(|err| Error::new(ErrorKind::InvalidToken, err))?;
        let mut parts = request.splitn(3, ':');

        let (Some("AP-REQ"), Some(user), Some(service_principal)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::new(ErrorKind::LogonDenied, "not a ticket"));
        };
        let domain = service_principal.split_once('@').map(|(_, realm)| realm).unwrap_or_default();

        Ok(AcceptedTicket {
            identity: AuthenticatedIdentity {
                user: user.to_owned(),
                domain: domain.to_owned(),
            },
            session_key: Secret::new(compute_md5(ap_req).to_vec()),
            ap_rep: self.mutual.then(|| FAKE_AP_REP.to_vec()),
        })
    }
}

#[derive(Debug)]
struct FakeTicketContext {
    request: Vec<u8>,
    session_key: Option<Vec<u8>>,
}

impl TicketContext for FakeTicketContext {
    fn is_valid(&self) -> bool {
        true
    }

    fn first_request(&mut self) -> Result<Vec<u8>> {
        self.session_key = Some(compute_md5(&self.request).to_vec());

        Ok(self.request.clone())
    }

    fn next_request(&mut self, ap_rep: &[u8]) -> Result<Option<Vec<u8>>> {
        if ap_rep != FAKE_AP_REP {
            return Err(Error::new(ErrorKind::InvalidToken, "unexpected AP-REP"));
        }

        Ok(None)
    }

    fn session_key(&self) -> Option<Vec<u8>> {
        self.session_key.clone()
    }
}
