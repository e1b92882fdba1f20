#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use md5::{Digest, Md5};
use smb_spnego::kerberos::{self, AcceptedTicket, TicketContext, TicketExchange};
use smb_spnego::negotiate::AuthenticatedIdentity;
use smb_spnego::{
    AuthSession, Credentials, EncryptedCredentials, Error, ErrorKind, PasswordAlgorithm, PasswordEncryptor, Passwords,
    Result, Secret, SecurityStatus, ServerConfig, ServerDispatcher, Transport, TransportError,
};
use tracing_subscriber::EnvFilter;

pub const USER: &str = "alice";
pub const DOMAIN: &str = "CORP";
pub const PASSWORD: &str = "Passw0rd!";
pub const SERVER_NAME: &str = "fs1.corp.example.com";

/// negTokenTarg { negResult reject }
pub const REJECT: &[u8] = &[0xA1, 0x07, 0x30, 0x05, 0xA0, 0x03, 0x0A, 0x01, 0x02];

static TRACING: Once = Once::new();

/// Logs go to the test output, filtered by `SMB_AUTH_LOG_LEVEL`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_env("SMB_AUTH_LOG_LEVEL"))
            .with_test_writer()
            .try_init();
    });
}

pub fn credentials() -> Credentials {
    Credentials::new(USER, DOMAIN, PASSWORD)
}

pub fn server_config() -> ServerConfig {
    ServerConfig::new(DOMAIN, "FS1", "corp.example.com", SERVER_NAME)
}

fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }

    let mut digest = [0x00; 16];
    digest.clone_from_slice(&hasher.finalize());

    digest
}

/// 24-byte response: a digest of the inputs followed by the algorithm repeated, so that a verifier
/// can recompute it.
pub fn test_response(algorithm: u8, password: &str, key_material: &[u8]) -> Vec<u8> {
    let digest = md5(&[std::slice::from_ref(&algorithm), password.as_bytes(), key_material]);

    [digest.as_slice(), [algorithm; 8].as_slice()].concat()
}

#[derive(Debug, Default)]
pub struct TestEncryptor;

impl PasswordEncryptor for TestEncryptor {
    fn encrypt(
        &self,
        credentials: &Credentials,
        first: PasswordAlgorithm,
        second: PasswordAlgorithm,
        key_material: &[u8],
        _target_info: Option<&[u8]>,
        _timestamp: u64,
    ) -> Result<EncryptedCredentials> {
        let password = credentials.password.as_ref();

        Ok(EncryptedCredentials {
            first: test_response(first as u8, password, key_material),
            second: test_response(second as u8, password, key_material),
            mac_key: Secret::new(md5(&[password.as_bytes(), key_material]).to_vec()),
            response: Vec::new(),
        })
    }

    fn ntlmv2_session_key(&self, mac_key: &[u8], previous_mac_key: &[u8]) -> Result<Vec<u8>> {
        Ok(md5(&[mac_key, previous_mac_key]).to_vec())
    }
}

pub const AP_REP: &[u8] = b"AP-REP";

/// Ticket engine trading readable tokens: `AP-REQ:<user>:<service principal>`.
#[derive(Debug, Default)]
pub struct TestTicketExchange {
    pub fail_init: bool,
    pub invalid_contexts: bool,
    pub init_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub contexts: AtomicUsize,
}

impl TestTicketExchange {
    pub fn failing() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    /// Creates contexts that report themselves invalid, e.g. for lack of a ticket.
    pub fn with_invalid_contexts() -> Self {
        Self {
            invalid_contexts: true,
            ..Self::default()
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl TicketExchange for TestTicketExchange {
    fn init(&self) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_init {
            return Err(Error::new(ErrorKind::NoCredentials, "no ticket cache"));
        }

        Ok(())
    }

    fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn create_context(&self, service_principal: &str, credentials: &Credentials) -> Result<Box<dyn TicketContext>> {
        self.contexts.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(TestTicketContext {
            request: format!("AP-REQ:{}:{service_principal}", credentials.username).into_bytes(),
            session_key: None,
            valid: !self.invalid_contexts,
        }))
    }

    fn accept(&self, ap_req: &[u8]) -> Result<AcceptedTicket> {
        let request = String::from_utf8_lossy(ap_req);
        let mut parts = request.splitn(3, ':');

        let (Some("AP-REQ"), Some(user), Some(service_principal)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::new(ErrorKind::LogonDenied, "not a ticket"));
        };

        Ok(AcceptedTicket {
            identity: AuthenticatedIdentity {
                user: user.to_owned(),
                domain: service_principal
                    .split_once('@')
                    .map(|(_, realm)| realm.to_owned())
                    .unwrap_or_default(),
            },
            session_key: Secret::new(md5(&[ap_req]).to_vec()),
            ap_rep: Some(AP_REP.to_vec()),
        })
    }
}

#[derive(Debug)]
struct TestTicketContext {
    request: Vec<u8>,
    session_key: Option<Vec<u8>>,
    valid: bool,
}

impl TicketContext for TestTicketContext {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn first_request(&mut self) -> Result<Vec<u8>> {
        self.session_key = Some(md5(&[self.request.as_slice()]).to_vec());

        Ok(self.request.clone())
    }

    fn next_request(&mut self, ap_rep: &[u8]) -> Result<Option<Vec<u8>>> {
        if ap_rep != AP_REP {
            return Err(Error::new(ErrorKind::InvalidToken, "unexpected AP-REP"));
        }

        Ok(None)
    }

    fn session_key(&self) -> Option<Vec<u8>> {
        self.session_key.clone()
    }
}

/// In-process server: a [`ServerDispatcher`] plus the host's credential check.
///
/// Wrapped exchanges that fail verification get a reject negTokenTarg; unwrapped ones fail the
/// transport, the way an SMB server answers STATUS_LOGON_FAILURE.
#[derive(Debug)]
pub struct LoopbackServer {
    pub dispatcher: ServerDispatcher,
    pub session: AuthSession,
    pub users: Vec<(String, String)>,
    pub allow_anonymous: bool,
    /// Failures returned instead of processing the next blobs.
    pub failures: VecDeque<TransportError>,
    pub received: Vec<Vec<u8>>,
    pub authenticated: Option<String>,
}

impl LoopbackServer {
    pub fn new(dispatcher: ServerDispatcher) -> Self {
        Self {
            dispatcher,
            session: AuthSession::with_challenge([0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF]),
            users: vec![(USER.to_owned(), PASSWORD.to_owned())],
            allow_anonymous: false,
            failures: VecDeque::new(),
            received: Vec::new(),
            authenticated: None,
        }
    }

    pub fn ntlm_only() -> Self {
        Self::new(ServerDispatcher::new(server_config()))
    }

    pub fn with_kerberos(ticket_exchange: Arc<TestTicketExchange>) -> Self {
        Self::new(ServerDispatcher::new(server_config()).with_ticket_exchange(ticket_exchange))
    }

    /// The security blob of the NEGOTIATE response.
    pub fn negotiate_token(&self) -> Vec<u8> {
        self.dispatcher.negotiate_token().expect("at least one mechanism is enabled")
    }

    fn verify(&self, passwords: &Passwords<'_>, identity: Option<&AuthenticatedIdentity>) -> Option<String> {
        if passwords.kerberos_authenticated {
            return identity.map(|identity| identity.user.clone());
        }

        if passwords.is_anonymous() {
            return self.allow_anonymous.then(String::new);
        }

        let user = passwords.user_name();
        let (_, password) = self.users.iter().find(|(name, _)| *name == user)?;
        let algorithm = *passwords.ntlm.last()?;

        (passwords.ntlm == test_response(algorithm, password, &self.session.challenge).as_slice()).then_some(user)
    }
}

impl Transport for LoopbackServer {
    fn exchange(&mut self, blob: &[u8]) -> std::result::Result<Vec<u8>, TransportError> {
        self.received.push(blob.to_vec());

        if let Some(failure) = self.failures.pop_front() {
            return Err(failure);
        }

        let output = self
            .dispatcher
            .accept_security_blob(Some(&mut self.session), blob)
            .map_err(|err| TransportError::Failed(err.to_string()))?;

        if output.status != SecurityStatus::CompleteNeeded {
            return Ok(output.response);
        }

        let wrapped = !blob.starts_with(b"NTLMSSP\0") && !kerberos::is_naked_kerberos(blob);
        let passwords = output
            .passwords
            .ok_or_else(|| TransportError::Failed("no credentials extracted".to_owned()))?;

        match self.verify(&passwords, output.identity.as_ref()) {
            Some(user) => {
                self.authenticated = Some(user);

                Ok(output.response)
            }
            None if wrapped => Ok(REJECT.to_vec()),
            None => Err(TransportError::Failed("STATUS_LOGON_FAILURE".to_owned())),
        }
    }
}
