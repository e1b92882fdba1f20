use super::test_engine::{FakeTicketExchange, FAKE_AP_REP};
use super::*;
use crate::negotiate::extractors::decode_neg_token_init;

fn client(oid: &'static [u8]) -> KerberosClient {
    KerberosClient::new(
        &FakeTicketExchange::default(),
        "cifs/fs1.corp.example.com@CORP.EXAMPLE.COM",
        &Credentials::new("alice", "CORP", "password"),
        oid,
    )
    .unwrap()
}

#[test]
fn service_principal_from_fqdn() {
    assert_eq!(
        service_principal_name("fs1.corp.example.com", None),
        "cifs/fs1.corp.example.com@CORP.EXAMPLE.COM"
    );
}

#[test]
fn service_principal_with_explicit_realm() {
    assert_eq!(service_principal_name("fs1", Some("example.org")), "cifs/fs1@EXAMPLE.ORG");
    assert_eq!(service_principal_name("fs1", None), "cifs/fs1");
}

#[test]
fn gss_token_framing() {
    let token = wrap_krb_token(oids::KRB5, AP_REQ_TOKEN_ID, b"ticket").unwrap();

    assert_eq!(token[0], ber::APPLICATION_0);
    assert!(is_naked_kerberos(&token));
    assert_eq!(unwrap_krb_token(&token, AP_REQ_TOKEN_ID).unwrap(), (oids::KRB5, &b"ticket"[..]));
}

#[test]
fn unexpected_token_id() {
    let token = wrap_krb_token(oids::MS_KRB5, AP_REP_TOKEN_ID, b"reply").unwrap();

    assert_eq!(
        unwrap_krb_token(&token, AP_REQ_TOKEN_ID).unwrap_err().error_type,
        ErrorKind::InvalidToken
    );
}

#[test]
fn krb_error_denies_logon() {
    let token = wrap_krb_token(oids::KRB5, KRB_ERROR_TOKEN_ID, b"error").unwrap();

    assert_eq!(
        unwrap_krb_token(&token, AP_REP_TOKEN_ID).unwrap_err().error_type,
        ErrorKind::LogonDenied
    );
}

#[test]
fn truncated_gss_token() {
    let token = wrap_krb_token(oids::KRB5, AP_REQ_TOKEN_ID, b"ticket").unwrap();

    assert!(unwrap_krb_token(&token[..token.len() - 1], AP_REQ_TOKEN_ID).is_err());
    assert!(!is_naked_kerberos(&token[..3]));
}

#[test]
fn other_mechanisms_are_not_naked_kerberos() {
    let spnego = generators::generate_neg_token_init(&[oids::KRB5], None, usize::MAX).unwrap();

    assert!(!is_naked_kerberos(&spnego));
    assert!(!is_naked_kerberos(&[]));
}

#[test]
fn negotiation_blob_lists_kerberos_then_ntlmssp() {
    let mut client = client(oids::MS_KRB5);
    let ap_req = client.generate_first_request().unwrap();

    let blob = client.pack_negotiation_blob(&ap_req, usize::MAX).unwrap();
    assert_eq!(blob.len(), client.negotiation_blob_len(ap_req.len()));

    let init = decode_neg_token_init(&blob).unwrap();
    assert_eq!(init.mech_types, vec![oids::MS_KRB5, oids::NTLMSSP]);

    let (oid, token) = unwrap_krb_token(init.mech_token.unwrap(), AP_REQ_TOKEN_ID).unwrap();
    assert_eq!(oid, oids::MS_KRB5);
    assert_eq!(token, ap_req.as_slice());
}

#[test]
fn negotiation_blob_reports_required_size() {
    let mut client = client(oids::KRB5);
    let ap_req = client.generate_first_request().unwrap();
    let required = client.negotiation_blob_len(ap_req.len());

    let err = client.pack_negotiation_blob(&ap_req, required - 1).unwrap_err();
    assert_eq!(err.error_type, ErrorKind::BufferTooSmall);
    assert!(err.description.contains(&required.to_string()));

    assert!(client.pack_negotiation_blob(&ap_req, required).is_ok());
}

#[test]
fn client_accepts_wrapped_and_raw_ap_rep() {
    let mut client = client(oids::KRB5);
    client.generate_first_request().unwrap();

    let wrapped = wrap_krb_token(oids::KRB5, AP_REP_TOKEN_ID, FAKE_AP_REP).unwrap();
    assert_eq!(client.generate_next_request(&wrapped).unwrap(), None);
    assert_eq!(client.generate_next_request(FAKE_AP_REP).unwrap(), None);

    assert!(client.session_key().is_some());
    assert_eq!(client.session_key(), client.mac_key());
}

#[test]
fn server_answers_with_ap_rep_for_mutual_authentication() {
    let exchange = FakeTicketExchange { mutual: true };
    let token = wrap_krb_token(oids::MS_KRB5, AP_REQ_TOKEN_ID, b"AP-REQ:alice:cifs/fs1@CORP").unwrap();

    let output = accept_security_token(&exchange, &token).unwrap();

    assert_eq!(output.status, SecurityStatus::CompleteNeeded);
    assert_eq!(
        unwrap_krb_token(&output.response, AP_REP_TOKEN_ID).unwrap(),
        (oids::MS_KRB5, FAKE_AP_REP)
    );
    assert!(output.passwords.unwrap().kerberos_authenticated);
    assert_eq!(
        output.identity.unwrap(),
        AuthenticatedIdentity {
            user: "alice".to_owned(),
            domain: "CORP".to_owned(),
        }
    );
    assert!(output.session_key.is_some());
}

#[test]
fn server_without_ap_rep_needs_more_processing() {
    let token = wrap_krb_token(oids::KRB5, AP_REQ_TOKEN_ID, b"AP-REQ:alice:cifs/fs1").unwrap();

    let output = accept_security_token(&FakeTicketExchange::default(), &token).unwrap();

    assert_eq!(output.status, SecurityStatus::ContinueNeeded);
    assert!(output.response.is_empty());
}

#[test]
fn server_rejects_non_kerberos_oid() {
    let token = wrap_krb_token(oids::NTLMSSP, AP_REQ_TOKEN_ID, b"AP-REQ:alice:cifs/fs1").unwrap();

    assert_eq!(
        accept_security_token(&FakeTicketExchange::default(), &token)
            .unwrap_err()
            .error_type,
        ErrorKind::SecurityPackageNotFound
    );
}
