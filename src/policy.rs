//! Security levels: which password algorithms and which mechanisms a logon attempt may use.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::crypter::{self, EncryptedCredentials, PasswordEncryptor};
use crate::{Credentials, Error, ErrorKind, Result};

/// Highest level reachable through [`SecurityPolicy::define_level`] and
/// [`SecurityPolicy::set_auth_level`].
pub const MAX_CONFIGURABLE_LEVEL: usize = 4;

/// Slot reserved for internal use. Configuration calls never touch it.
pub const INTERNAL_LEVEL: usize = 5;

const LEVEL_COUNT: usize = INTERNAL_LEVEL + 1;
const NON_SECURE_LEVELS: usize = 3;

/// Selector handed to the password encryptor for one of the two response buffers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PasswordAlgorithm {
    #[default]
    None,
    Lm,
    Ntlm,
    Lm2,
    Ntlm2,
}

bitflags! {
    /// Mechanisms a security level allows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MechanismMask: u32 {
        const NTLMSSP = 0x0000_0001;
        const KERBEROS = 0x0000_0002;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityLevel {
    pub first: PasswordAlgorithm,
    pub second: PasswordAlgorithm,
    pub mechanisms: MechanismMask,
}

impl SecurityLevel {
    pub const fn new(first: PasswordAlgorithm, second: PasswordAlgorithm, mechanisms: MechanismMask) -> Self {
        Self {
            first,
            second,
            mechanisms,
        }
    }

    const fn disabled(mechanisms: MechanismMask) -> Self {
        Self::new(PasswordAlgorithm::None, PasswordAlgorithm::None, mechanisms)
    }

    /// A level with a `None` algorithm or without mechanisms is never attempted.
    pub fn is_enabled(&self) -> bool {
        self.has_algorithms() && !self.mechanisms.is_empty()
    }

    pub fn has_algorithms(&self) -> bool {
        self.first != PasswordAlgorithm::None && self.second != PasswordAlgorithm::None
    }

    /// LMv2 paired with plain NTLM: the NTLM2 session response variant.
    pub fn is_ntlm2_session(&self) -> bool {
        self.first == PasswordAlgorithm::Lm2 && self.second == PasswordAlgorithm::Ntlm
    }
}

const NTLMSSP_AND_KERBEROS: MechanismMask = MechanismMask::NTLMSSP.union(MechanismMask::KERBEROS);

const DEFAULT_LEVELS: [SecurityLevel; LEVEL_COUNT] = [
    SecurityLevel::disabled(MechanismMask::NTLMSSP),
    SecurityLevel::disabled(MechanismMask::NTLMSSP),
    SecurityLevel::disabled(NTLMSSP_AND_KERBEROS),
    SecurityLevel::new(PasswordAlgorithm::Lm2, PasswordAlgorithm::Ntlm2, MechanismMask::NTLMSSP),
    SecurityLevel::new(PasswordAlgorithm::Lm2, PasswordAlgorithm::Ntlm2, NTLMSSP_AND_KERBEROS),
    SecurityLevel::new(PasswordAlgorithm::Lm2, PasswordAlgorithm::Ntlm, MechanismMask::NTLMSSP),
];

const NON_SECURE_DEFAULT_LEVELS: [SecurityLevel; NON_SECURE_LEVELS] = [
    SecurityLevel::new(PasswordAlgorithm::Lm, PasswordAlgorithm::Ntlm, MechanismMask::NTLMSSP),
    SecurityLevel::new(PasswordAlgorithm::Ntlm, PasswordAlgorithm::Ntlm, MechanismMask::NTLMSSP),
    SecurityLevel::new(PasswordAlgorithm::Lm, PasswordAlgorithm::Ntlm, NTLMSSP_AND_KERBEROS),
];

fn default_level(index: usize, non_secure: bool) -> SecurityLevel {
    if non_secure && index < NON_SECURE_LEVELS {
        NON_SECURE_DEFAULT_LEVELS[index]
    } else {
        DEFAULT_LEVELS[index]
    }
}

/// The level table owned by one client negotiation driver.
///
/// Levels `0..=4` are configurable, level 5 is internal. The current level marks where a logon
/// starts its downward walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    levels: [SecurityLevel; LEVEL_COUNT],
    current_level: usize,
    non_secure: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LEVELS,
            current_level: MAX_CONFIGURABLE_LEVEL,
            non_secure: false,
        }
    }
}

impl SecurityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_level(&self) -> usize {
        self.current_level
    }

    pub fn is_non_secure(&self) -> bool {
        self.non_secure
    }

    pub fn level(&self, index: usize) -> Option<&SecurityLevel> {
        self.levels.get(index)
    }

    /// Overwrites one configurable slot.
    ///
    /// If the new slot is usable (both algorithms set and at least one mechanism) it also becomes
    /// the current level.
    pub fn define_level(
        &mut self,
        index: usize,
        first: PasswordAlgorithm,
        second: PasswordAlgorithm,
        mechanisms: MechanismMask,
    ) -> Result<()> {
        check_configurable(index)?;

        let level = SecurityLevel::new(first, second, mechanisms);
        self.levels[index] = level;

        if level.is_enabled() {
            self.current_level = index;
        }

        debug!(index, ?level, current_level = self.current_level, "security level defined");

        Ok(())
    }

    /// Selects exactly one configurable level: the requested slot is reset to its built-in
    /// default and every other configurable slot is disabled.
    ///
    /// Fails with [`ErrorKind::AlgorithmMismatch`], leaving the table untouched, when the default
    /// of the requested slot has no algorithms in the current mode.
    pub fn set_auth_level(&mut self, level: usize) -> Result<()> {
        check_configurable(level)?;

        if !default_level(level, self.non_secure).is_enabled() {
            return Err(Error::new(
                ErrorKind::AlgorithmMismatch,
                format!("security level {level} needs non-secure mode to be enabled"),
            ));
        }

        for index in 0..=MAX_CONFIGURABLE_LEVEL {
            let default = default_level(index, self.non_secure);
            self.levels[index] = if index == level {
                default
            } else {
                SecurityLevel::disabled(default.mechanisms)
            };
        }
        self.current_level = level;

        debug!(level, non_secure = self.non_secure, "authentication level selected");

        Ok(())
    }

    /// Turns the legacy non-secure mode on or off.
    ///
    /// The three lowest slots switch between the secure defaults (disabled) and plain LM/NTLM,
    /// unless they were redefined explicitly.
    pub fn set_non_secure(&mut self, enabled: bool) {
        if self.non_secure == enabled {
            return;
        }

        for index in 0..NON_SECURE_LEVELS {
            if self.levels[index] == default_level(index, self.non_secure) {
                self.levels[index] = default_level(index, enabled);
            }
        }
        self.non_secure = enabled;

        if enabled {
            warn!("non-secure authentication mode enabled: LM/NTLMv1 responses may be sent");
        }
    }

    /// Runs the password encryptor once for `level` and returns the produced buffers.
    ///
    /// No target information is passed and the current time is used as the timestamp.
    pub fn generate_password_blobs(
        &self,
        level: usize,
        credentials: &Credentials,
        key: &[u8],
        encryptor: &dyn PasswordEncryptor,
    ) -> Result<EncryptedCredentials> {
        let security_level = self
            .level(level)
            .ok_or_else(|| Error::new(ErrorKind::InvalidParameter, format!("invalid security level: {level}")))?;

        if !security_level.has_algorithms() {
            let reason = if self.non_secure {
                "the level has no password algorithm"
            } else {
                "the level requires an algorithm that is disabled while non-secure mode is off"
            };

            return Err(Error::new(
                ErrorKind::AlgorithmMismatch,
                format!("security level {level} cannot encrypt passwords: {reason}"),
            ));
        }

        let timestamp = crypter::now_file_time_timestamp()?;
        crypter::encrypt_for_level(encryptor, credentials, security_level, key, None, timestamp)
    }
}

fn check_configurable(index: usize) -> Result<()> {
    if index > MAX_CONFIGURABLE_LEVEL {
        return Err(Error::new(
            ErrorKind::InvalidParameter,
            format!("security level {index} is not configurable (maximum is {MAX_CONFIGURABLE_LEVEL})"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypter::test_encryptor::FixedEncryptor;

    fn enabled_slots(policy: &SecurityPolicy) -> Vec<usize> {
        (0..=MAX_CONFIGURABLE_LEVEL)
            .filter(|index| policy.level(*index).unwrap().has_algorithms())
            .collect()
    }

    #[test]
    fn defaults_start_from_the_highest_level() {
        let policy = SecurityPolicy::default();

        assert_eq!(policy.current_level(), MAX_CONFIGURABLE_LEVEL);
        assert_eq!(enabled_slots(&policy), vec![3, 4]);
        assert!(policy.level(INTERNAL_LEVEL).unwrap().is_ntlm2_session());
    }

    #[test]
    fn set_auth_level_leaves_exactly_one_slot() {
        for level in [3, 4] {
            let mut policy = SecurityPolicy::default();
            policy.set_auth_level(level).unwrap();

            assert_eq!(enabled_slots(&policy), vec![level]);
            assert_eq!(policy.current_level(), level);
        }
    }

    #[test]
    fn set_auth_level_rejects_disabled_defaults() {
        for level in 0..=2 {
            let mut policy = SecurityPolicy::default();

            let err = policy.set_auth_level(level).unwrap_err();

            assert_eq!(err.error_type, ErrorKind::AlgorithmMismatch);
            assert_eq!(policy, SecurityPolicy::default());
        }
    }

    #[test]
    fn set_auth_level_in_non_secure_mode() {
        let mut policy = SecurityPolicy::default();
        policy.set_non_secure(true);
        policy.set_auth_level(1).unwrap();

        assert_eq!(enabled_slots(&policy), vec![1]);
        assert_eq!(
            *policy.level(1).unwrap(),
            SecurityLevel::new(PasswordAlgorithm::Ntlm, PasswordAlgorithm::Ntlm, MechanismMask::NTLMSSP)
        );
    }

    #[test]
    fn configuration_never_touches_the_internal_level() {
        let mut policy = SecurityPolicy::default();
        let internal = *policy.level(INTERNAL_LEVEL).unwrap();

        let err = policy
            .define_level(
                INTERNAL_LEVEL,
                PasswordAlgorithm::Lm,
                PasswordAlgorithm::Lm,
                MechanismMask::NTLMSSP,
            )
            .unwrap_err();
        assert_eq!(err.error_type, ErrorKind::InvalidParameter);
        assert!(policy.set_auth_level(INTERNAL_LEVEL).is_err());

        policy.set_auth_level(3).unwrap();
        assert_eq!(*policy.level(INTERNAL_LEVEL).unwrap(), internal);
    }

    #[test]
    fn define_level_updates_current_level_only_when_usable() {
        let mut policy = SecurityPolicy::default();

        policy
            .define_level(2, PasswordAlgorithm::Lm2, PasswordAlgorithm::Ntlm2, MechanismMask::empty())
            .unwrap();
        assert_eq!(policy.current_level(), MAX_CONFIGURABLE_LEVEL);

        policy
            .define_level(2, PasswordAlgorithm::Lm2, PasswordAlgorithm::Ntlm2, MechanismMask::NTLMSSP)
            .unwrap();
        assert_eq!(policy.current_level(), 2);
    }

    #[test]
    fn non_secure_toggle_switches_low_defaults() {
        let mut policy = SecurityPolicy::default();
        policy.set_non_secure(true);
        assert_eq!(enabled_slots(&policy), vec![0, 1, 2, 3, 4]);

        policy.set_non_secure(false);
        assert_eq!(enabled_slots(&policy), vec![3, 4]);
    }

    #[test]
    fn password_blobs_require_enabled_algorithms() {
        let mut policy = SecurityPolicy::default();
        policy.set_auth_level(4).unwrap();
        let credentials = Credentials::new("user", "DOMAIN", "password");
        let encryptor = FixedEncryptor::default();

        for level in 0..MAX_CONFIGURABLE_LEVEL {
            let err = policy
                .generate_password_blobs(level, &credentials, &[0x01; 8], &encryptor)
                .unwrap_err();
            assert_eq!(err.error_type, ErrorKind::AlgorithmMismatch);
        }

        let blobs = policy
            .generate_password_blobs(4, &credentials, &[0x01; 8], &encryptor)
            .unwrap();
        assert!(!blobs.first.is_empty());
        assert!(!blobs.second.is_empty());
    }
}
