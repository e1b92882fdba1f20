use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use super::*;
use crate::crypter::test_encryptor::FixedEncryptor;
use crate::negotiate::generators::generate_neg_token_targ;
use crate::negotiate::NegResult;
use crate::ntlm::messages::av_pair::AvPair;
use crate::ntlm::messages::{write_ntlm_header, MessageTypes};
use crate::ntlm::{NegotiateFlags, NtlmClient, NtlmState};
use crate::policy::{MechanismMask, PasswordAlgorithm, SecurityLevel};
use crate::{Credentials, ErrorKind};

const SERVER_CHALLENGE: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];

fn server_flags() -> NegotiateFlags {
    NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_NTLM
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY
}

/// A CHALLENGE message with the given target info. `None` stops after the challenge, like old
/// servers do.
fn challenge_message(target_info: Option<&[u8]>) -> Vec<u8> {
    let mut message = Vec::new();
    write_ntlm_header(&mut message, MessageTypes::Challenge).unwrap();
    message.extend_from_slice(&[0x00; 8]); // empty target name
    message.extend_from_slice(&server_flags().bits().to_le_bytes());
    message.extend_from_slice(&SERVER_CHALLENGE);

    if let Some(target_info) = target_info {
        message.extend_from_slice(&[0x00; 8]); // reserved
        message.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        message.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        message.extend_from_slice(&48u32.to_le_bytes());
        message.extend_from_slice(target_info);
    }

    message
}

fn client(credentials: Credentials) -> NtlmClient {
    let level = SecurityLevel::new(PasswordAlgorithm::Lm2, PasswordAlgorithm::Ntlm2, MechanismMask::NTLMSSP);

    NtlmClient::new(credentials, level, Arc::new(FixedEncryptor)).with_workstation(Some("WS01".to_owned()))
}

#[test]
fn negotiate_message_layout() {
    let mut client = client(Credentials::new("alice", "CORP", "password"));
    let message = write_negotiate(&mut client).unwrap();

    assert_eq!(message.len(), 32);
    assert_eq!(&message[..8], b"NTLMSSP\0");
    assert_eq!(LittleEndian::read_u32(&message[8..12]), 1);

    let flags = NegotiateFlags::from_bits_truncate(LittleEndian::read_u32(&message[12..16]));
    assert!(flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_NTLM | NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE));
    assert!(flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY));
    assert_eq!(client.state, NtlmState::Challenge);
}

#[test]
fn short_challenge_is_accepted() {
    let message = challenge_message(None);
    assert_eq!(message.len(), 32);

    let challenge = read_challenge(&message).unwrap();

    assert_eq!(challenge.server_challenge, SERVER_CHALLENGE);
    assert_eq!(challenge.target_info, None);
    assert_eq!(challenge.timestamp, None);
}

#[test]
fn challenge_target_info_and_timestamp() {
    let target_info = AvPair::list_to_buffer(&[
        AvPair::NbDomainName(b"C\0O\0R\0P\0".to_vec()),
        AvPair::Timestamp(0x01D9_1234_5678_9ABC),
        AvPair::EOL,
    ])
    .unwrap();
    let message = challenge_message(Some(&target_info));

    let challenge = read_challenge(&message).unwrap();

    assert_eq!(challenge.flags, server_flags());
    assert_eq!(challenge.target_info, Some(target_info.as_slice()));
    assert_eq!(challenge.timestamp, Some(0x01D9_1234_5678_9ABC));
}

#[test]
fn truncated_challenge() {
    let message = challenge_message(None);

    assert_eq!(read_challenge(&message[..31]).unwrap_err().error_type, ErrorKind::InvalidToken);

    let mut lying = challenge_message(Some(&[0x00, 0x00, 0x00, 0x00]));
    lying.truncate(lying.len() - 1);
    assert_eq!(read_challenge(&lying).unwrap_err().error_type, ErrorKind::InvalidToken);
}

#[test]
fn locate_challenge_in_spnego_reply() {
    let message = challenge_message(None);
    let blob = generate_neg_token_targ(Some(NegResult::AcceptIncomplete), None, Some(&message)).unwrap();

    assert_eq!(locate_server_challenge(&blob).unwrap(), &SERVER_CHALLENGE);
    assert_eq!(locate_server_challenge(&message).unwrap(), &SERVER_CHALLENGE);
}

#[test]
fn locate_challenge_requires_a_challenge_message() {
    let mut negotiate = Vec::new();
    write_ntlm_header(&mut negotiate, MessageTypes::Negotiate).unwrap();
    negotiate.extend_from_slice(&[0x00; 20]);

    assert!(locate_server_challenge(&negotiate).is_err());
    assert!(locate_server_challenge(b"no signature here").is_err());
    assert!(locate_server_challenge(&challenge_message(None)[..30]).is_err());
}

/// Resolves the six security buffers of an AUTHENTICATE message, in header order.
fn authenticate_buffers(message: &[u8]) -> Vec<(usize, usize)> {
    (0..6)
        .map(|index| {
            let field = &message[12 + index * 8..20 + index * 8];
            let length = usize::from(LittleEndian::read_u16(&field[0..2]));
            let offset = LittleEndian::read_u32(&field[4..8]) as usize;

            (offset, offset + length)
        })
        .collect()
}

#[test]
fn authenticate_buffers_do_not_overlap() {
    let mut client = client(Credentials::new("alice", "CORP", "password"));
    write_negotiate(&mut client).unwrap();

    let message = challenge_message(None);
    let challenge = read_challenge(&message).unwrap();
    let authenticate = write_authenticate(&mut client, &challenge).unwrap();

    let mut buffers = authenticate_buffers(&authenticate);
    for (start, end) in &buffers {
        assert!(*start >= authenticate::HEADER_SIZE);
        assert!(*end <= authenticate.len());
    }

    buffers.sort();
    for pair in buffers.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
    }

    assert_eq!(client.state, NtlmState::Completion);
}

#[test]
fn authenticate_flags_are_the_intersection() {
    let mut client = client(Credentials::new("alice", "CORP", "password"));
    write_negotiate(&mut client).unwrap();

    let message = challenge_message(None);
    let authenticate = write_authenticate(&mut client, &read_challenge(&message).unwrap()).unwrap();

    let flags = NegotiateFlags::from_bits_truncate(LittleEndian::read_u32(&authenticate[60..64]));
    assert_eq!(flags, server_flags());
}

#[test]
fn anonymous_authenticate() {
    let mut client = client(Credentials::anonymous());
    write_negotiate(&mut client).unwrap();

    let message = challenge_message(None);
    let authenticate = write_authenticate(&mut client, &read_challenge(&message).unwrap()).unwrap();

    let buffers = authenticate_buffers(&authenticate);
    assert_eq!(buffers[0].0, buffers[0].1, "LM response");
    assert_eq!(buffers[1].0, buffers[1].1, "NT response");

    let flags = NegotiateFlags::from_bits_truncate(LittleEndian::read_u32(&authenticate[60..64]));
    assert!(flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_ANONYMOUS));
}

#[test]
fn authenticate_before_negotiate() {
    let mut client = client(Credentials::new("alice", "CORP", "password"));
    let message = challenge_message(None);

    assert_eq!(
        write_authenticate(&mut client, &read_challenge(&message).unwrap())
            .unwrap_err()
            .error_type,
        ErrorKind::OutOfSequence
    );
}
