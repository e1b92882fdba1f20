use super::*;

#[test]
fn fields_are_laid_out_back_to_back() {
    let first = MessageFields::with_buffer(vec![0x01; 4]).at(64);
    let second = MessageFields::with_buffer(vec![0x02; 6]).after(&first);
    let empty = MessageFields::new().after(&second);

    assert_eq!(second.buffer_offset, 68);
    assert_eq!(empty.buffer_offset, 74);
    assert_eq!(empty.end(), 74);
}

#[test]
fn field_header_encoding() {
    let field = MessageFields::with_buffer(vec![0xAA; 0x18]).at(0x40);
    let mut header = Vec::new();
    field.write_to(&mut header).unwrap();

    assert_eq!(header, [0x18, 0x00, 0x18, 0x00, 0x40, 0x00, 0x00, 0x00]);

    let descriptor = FieldDescriptor::read_from(header.as_slice()).unwrap();
    assert_eq!(descriptor, FieldDescriptor { length: 0x18, offset: 0x40 });
}

#[test]
fn oversized_field_is_not_written() {
    let field = MessageFields::with_buffer(vec![0x00; usize::from(u16::MAX) + 1]);

    assert!(field.write_to(Vec::new()).is_err());
}

#[test]
fn descriptor_slices_inside_the_message() {
    let message = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05];

    assert_eq!(
        FieldDescriptor { length: 2, offset: 3 }.slice(&message, "field").unwrap(),
        &[0x03, 0x04]
    );
    assert_eq!(FieldDescriptor { length: 2, offset: 4 }.slice(&message, "field").unwrap(), &[0x04, 0x05]);
    assert!(FieldDescriptor { length: 0, offset: 0xFFFF_FFFF }
        .slice(&message, "field")
        .unwrap()
        .is_empty());
}

#[test]
fn descriptor_outside_the_message() {
    let message = [0x00; 6];

    for descriptor in [
        FieldDescriptor { length: 2, offset: 5 },
        FieldDescriptor { length: 7, offset: 0 },
        FieldDescriptor {
            length: 1,
            offset: u32::MAX,
        },
    ] {
        assert_eq!(
            descriptor.slice(&message, "field").unwrap_err().error_type,
            ErrorKind::InvalidToken
        );
    }
}

#[test]
fn header_round_trip() {
    let mut message = Vec::new();
    write_ntlm_header(&mut message, MessageTypes::Challenge).unwrap();

    assert!(is_ntlmssp_message(&message));
    assert_eq!(read_message_type(message.as_slice()).unwrap(), MessageTypes::Challenge);
    assert!(read_ntlm_header(message.as_slice(), MessageTypes::Challenge).is_ok());
    assert_eq!(
        read_ntlm_header(message.as_slice(), MessageTypes::Authenticate)
            .unwrap_err()
            .error_type,
        ErrorKind::InvalidToken
    );
}

#[test]
fn invalid_signature_and_type() {
    assert!(read_message_type(&b"NTLMSSX\0\x01\0\0\0"[..]).is_err());
    assert!(read_message_type(&b"NTLMSSP\0\x04\0\0\0"[..]).is_err());
    assert!(read_message_type(&b"NTLMSSP\0\x01"[..]).is_err());
    assert!(!is_ntlmssp_message(b"NTLM"));
}

#[test]
fn short_fixed_part() {
    let err = check_header_size(&[0x00; 31], 32, MessageTypes::Negotiate).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::InvalidToken);
    assert!(check_header_size(&[0x00; 32], 32, MessageTypes::Negotiate).is_ok());
}
