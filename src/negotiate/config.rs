use serde::{Deserialize, Serialize};

use crate::policy::{MechanismMask, SecurityPolicy};
use crate::Credentials;

/// Largest session setup blob accepted by default.
pub const DEFAULT_MAX_BLOB_SIZE: usize = 0xFFFF;

/// Client logon settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiateConfig {
    pub credentials: Credentials,
    /// Host name of the server, used to build the Kerberos service principal.
    pub server_name: String,
    /// Kerberos realm of the server. Derived from `server_name` when absent.
    pub realm: Option<String>,
    /// Computer name, or "workstation name", of the client machine performing the authentication attempt
    pub workstation: Option<String>,
    /// Maximum size of the first security blob.
    pub max_blob_size: usize,
    pub policy: SecurityPolicy,
}

impl NegotiateConfig {
    pub fn new(credentials: Credentials, server_name: impl Into<String>) -> Self {
        Self {
            credentials,
            server_name: server_name.into(),
            realm: None,
            workstation: None,
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
            policy: SecurityPolicy::default(),
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_workstation(mut self, workstation: impl Into<String>) -> Self {
        self.workstation = Some(workstation.into());
        self
    }

    pub fn with_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_blob_size(mut self, max_blob_size: usize) -> Self {
        self.max_blob_size = max_blob_size;
        self
    }
}

/// Server identity and the mechanisms the dispatcher accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub netbios_domain: String,
    pub netbios_host: String,
    pub dns_domain: String,
    pub dns_host: String,
    pub mechanisms: MechanismMask,
}

impl ServerConfig {
    pub fn new(
        netbios_domain: impl Into<String>,
        netbios_host: impl Into<String>,
        dns_domain: impl Into<String>,
        dns_host: impl Into<String>,
    ) -> Self {
        Self {
            netbios_domain: netbios_domain.into(),
            netbios_host: netbios_host.into(),
            dns_domain: dns_domain.into(),
            dns_host: dns_host.into(),
            mechanisms: MechanismMask::all(),
        }
    }

    pub fn with_mechanisms(mut self, mechanisms: MechanismMask) -> Self {
        self.mechanisms = mechanisms;
        self
    }
}
