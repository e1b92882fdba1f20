mod authenticate;
mod challenge;
mod negotiate;

use self::authenticate::read_authenticate;
use self::challenge::write_challenge;
use self::negotiate::read_negotiate;
use crate::negotiate::{MechanismOutput, ServerConfig};
use crate::ntlm::messages::{read_message_type, MessageTypes};
use crate::ntlm::AuthSession;
use crate::{Error, ErrorKind, Result, SecurityStatus};

/// Processes one raw NTLMSSP message received by the server.
///
/// NEGOTIATE is answered with a CHALLENGE built from the session's challenge. AUTHENTICATE
/// yields the client's responses with [`SecurityStatus::CompleteNeeded`]. Both need a bound
/// session.
#[instrument(level = "debug", skip_all, fields(len = message.len()))]
pub(crate) fn accept_message<'a>(
    session: Option<&mut AuthSession>,
    config: &ServerConfig,
    message: &'a [u8],
) -> Result<MechanismOutput<'a>> {
    let message_type = read_message_type(message)?;
    let session = session.ok_or_else(|| {
        Error::new(
            ErrorKind::NoContext,
            format!("NTLM {message_type:?} needs a session bound to the connection"),
        )
    })?;

    match message_type {
        MessageTypes::Negotiate => {
            read_negotiate(session, message)?;
            let challenge = write_challenge(session, config)?;

            Ok(MechanismOutput::continue_needed(challenge))
        }
        MessageTypes::Authenticate => {
            let passwords = read_authenticate(session, message)?;

            Ok(MechanismOutput {
                status: SecurityStatus::CompleteNeeded,
                response: Vec::new(),
                passwords: Some(passwords),
                identity: None,
                session_key: None,
            })
        }
        MessageTypes::Challenge => Err(Error::new(
            ErrorKind::OutOfSequence,
            "the server does not accept CHALLENGE messages",
        )),
    }
}
