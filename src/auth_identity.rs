use serde::{Deserialize, Serialize};

use crate::{utils, Secret};

/// The caller's logon credentials.
///
/// `password` is whatever the password encryptor needs to derive LM/NTLM responses (plain text or
/// a precomputed hash); it is opaque to the negotiation logic. An empty `username` designates an
/// anonymous logon.
#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub domain: String,
    pub password: Secret<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, domain: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            domain: domain.into(),
            password: Secret::new(password.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }

    pub(crate) fn user_utf16(&self) -> Vec<u8> {
        utils::string_to_utf16(&self.username)
    }

    pub(crate) fn domain_utf16(&self) -> Vec<u8> {
        utils::string_to_utf16(&self.domain)
    }
}
