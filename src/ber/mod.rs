//! DER tag/length/value primitives used by the GSS-API and SPNEGO envelopes.
//!
//! Every reader works on an [`io::Cursor`] over the received bytes. A malformed length or an
//! unexpected tag is reported as an [`io::ErrorKind::InvalidData`] error, a truncated buffer as
//! [`io::ErrorKind::UnexpectedEof`]; both become [`ErrorKind::InvalidToken`](crate::ErrorKind)
//! once they cross the crate boundary. Readers never move the cursor past the end of the buffer.


use std::io::{self, Read};

use byteorder::{ReadBytesExt, WriteBytesExt};

#[repr(u8)]
#[allow(unused)]
pub(crate) enum Pc {
    Primitive = 0x00,
    Construct = 0x20,
}

#[repr(u8)]
#[allow(unused)]
enum Class {
    Universal = 0x00,
    Application = 0x40,
    ContextSpecific = 0x80,
    Private = 0xC0,
}

#[repr(u8)]
#[allow(unused)]
enum Tag {
    Boolean = 0x01,
    Integer = 0x02,
    BitString = 0x03,
    OctetString = 0x04,
    ObjectIdentifier = 0x06,
    Enumerated = 0x0A,
    Sequence = 0x10,
}

const TAG_MASK: u8 = 0x1F;
const LONG_FORM: u8 = 0x80;
const MAX_LENGTH_OCTETS: u8 = 4;

pub const SEQUENCE: u8 = Class::Universal as u8 | Pc::Construct as u8 | Tag::Sequence as u8;
pub const OBJECT_IDENTIFIER: u8 = Class::Universal as u8 | Pc::Primitive as u8 | Tag::ObjectIdentifier as u8;
pub const OCTET_STRING: u8 = Class::Universal as u8 | Pc::Primitive as u8 | Tag::OctetString as u8;
pub const BIT_STRING: u8 = Class::Universal as u8 | Pc::Primitive as u8 | Tag::BitString as u8;
pub const ENUMERATED: u8 = Class::Universal as u8 | Pc::Primitive as u8 | Tag::Enumerated as u8;

/// `[APPLICATION 0]` constructed: the GSS-API InitialContextToken framing.
pub const APPLICATION_0: u8 = application_tag(0);

/// Identifier octet of a constructed `[APPLICATION n]` tag.
pub const fn application_tag(tagnum: u8) -> u8 {
    Class::Application as u8 | Pc::Construct as u8 | (TAG_MASK & tagnum)
}

/// Identifier octet of a constructed context-specific `[n]` tag.
pub const fn contextual_tag(tagnum: u8) -> u8 {
    Class::ContextSpecific as u8 | Pc::Construct as u8 | (TAG_MASK & tagnum)
}

/// Number of bytes the length encoding of `length` occupies.
pub fn sizeof_length(length: usize) -> usize {
    if length <= 0x7F {
        1
    } else {
        1 + length_octets(length)
    }
}

/// Number of bytes a tag header (identifier + length) occupies.
pub fn sizeof_tag(length: usize) -> usize {
    1 + sizeof_length(length)
}

/// Number of bytes a complete TLV with a `length`-byte payload occupies.
pub fn sizeof_tlv(length: usize) -> usize {
    sizeof_tag(length) + length
}

fn length_octets(length: usize) -> usize {
    let mut octets = 1;
    let mut rest = length >> 8;
    while rest != 0 {
        octets += 1;
        rest >>= 8;
    }
    octets
}

/// Reads one identifier octet followed by a short- or long-form length.
pub fn read_tag(mut stream: impl io::Read) -> io::Result<(u8, usize)> {
    let tag = stream.read_u8()?;
    let length = read_length(stream)?;

    Ok((tag, length))
}

/// Writes the identifier octet and the length, choosing the short form when `length <= 127`.
///
/// Returns the number of bytes written.
pub fn write_tag(mut stream: impl io::Write, tag: u8, length: usize) -> io::Result<usize> {
    stream.write_u8(tag)?;
    write_length(stream, length).map(|length| length + 1)
}

fn read_length(mut stream: impl io::Read) -> io::Result<usize> {
    let byte = stream.read_u8()?;

    if byte & LONG_FORM == 0 {
        return Ok(usize::from(byte));
    }

    let octets = byte & !LONG_FORM;
    if octets == 0 || octets > MAX_LENGTH_OCTETS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid length of the length: {octets}"),
        ));
    }

    let mut length = 0usize;
    for _ in 0..octets {
        length = (length << 8) | usize::from(stream.read_u8()?);
    }

    Ok(length)
}

fn write_length(mut stream: impl io::Write, length: usize) -> io::Result<usize> {
    if length <= 0x7F {
        stream.write_u8(length as u8)?;
        return Ok(1);
    }

    let octets = length_octets(length);
    if octets > usize::from(MAX_LENGTH_OCTETS) {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "the length is too big"));
    }

    stream.write_u8(LONG_FORM | octets as u8)?;
    for shift in (0..octets).rev() {
        stream.write_u8((length >> (shift * 8)) as u8)?;
    }

    Ok(1 + octets)
}

pub(crate) fn remaining<T: AsRef<[u8]>>(cursor: &io::Cursor<T>) -> usize {
    let len = cursor.get_ref().as_ref().len();
    len.saturating_sub(cursor.position() as usize)
}

/// Reads a tag header and checks both the identifier and that the announced length fits into
/// the rest of the buffer.
pub fn read_expected_tag<T: AsRef<[u8]>>(cursor: &mut io::Cursor<T>, expected: u8) -> io::Result<usize> {
    let (tag, length) = read_any_tag(cursor)?;

    if tag != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected tag: expected 0x{expected:02X} but got 0x{tag:02X}"),
        ));
    }

    Ok(length)
}

/// Reads whatever tag comes next and checks that its length fits into the rest of the buffer.
pub(crate) fn read_any_tag<T: AsRef<[u8]>>(cursor: &mut io::Cursor<T>) -> io::Result<(u8, usize)> {
    let (tag, length) = read_tag(&mut *cursor)?;

    if length > remaining(cursor) {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("tag 0x{tag:02X} announces {length} bytes but the buffer is shorter"),
        ));
    }

    Ok((tag, length))
}

/// Borrows the next `length` bytes of the underlying buffer and advances past them.
pub(crate) fn read_slice<'a>(cursor: &mut io::Cursor<&'a [u8]>, length: usize) -> io::Result<&'a [u8]> {
    let start = cursor.position() as usize;
    let buffer: &'a [u8] = *cursor.get_ref();

    let end = start
        .checked_add(length)
        .filter(|end| *end <= buffer.len())
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "the buffer is too short"))?;
    cursor.set_position(end as u64);

    Ok(&buffer[start..end])
}

pub(crate) fn skip<T: AsRef<[u8]>>(cursor: &mut io::Cursor<T>, length: usize) -> io::Result<()> {
    if length > remaining(cursor) {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "the buffer is too short"));
    }
    cursor.set_position(cursor.position() + length as u64);

    Ok(())
}

/// Parses one OBJECT IDENTIFIER and compares its payload with `oid`.
///
/// Returns `Ok(false)` on a tag, length or content mismatch. If `revert_on_mismatch` is set, the
/// cursor is moved back to where it was before the call so that another candidate can be tried
/// at the same position; otherwise it stays after the parsed element.
pub fn read_oid_and_compare<T: AsRef<[u8]>>(
    cursor: &mut io::Cursor<T>,
    oid: &[u8],
    revert_on_mismatch: bool,
) -> io::Result<bool> {
    let position = cursor.position();

    let (tag, length) = read_tag(&mut *cursor)?;
    if tag != OBJECT_IDENTIFIER {
        if revert_on_mismatch {
            cursor.set_position(position);
        } else {
            skip(cursor, length)?;
        }

        return Ok(false);
    }

    if length > remaining(cursor) {
        cursor.set_position(position);

        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated object identifier"));
    }

    let matches = if length == oid.len() {
        let mut value = vec![0x00; length];
        cursor.read_exact(&mut value)?;

        value == oid
    } else {
        skip(cursor, length)?;

        false
    };

    if !matches && revert_on_mismatch {
        cursor.set_position(position);
    }

    Ok(matches)
}

/// Reads one OBJECT IDENTIFIER and returns its raw payload.
pub(crate) fn read_oid<'a>(cursor: &mut io::Cursor<&'a [u8]>) -> io::Result<&'a [u8]> {
    let length = read_expected_tag(cursor, OBJECT_IDENTIFIER)?;

    read_slice(cursor, length)
}

/// Writes an OBJECT IDENTIFIER tag followed by the raw `oid` bytes.
pub fn write_oid(mut stream: impl io::Write, oid: &[u8]) -> io::Result<usize> {
    let tag_len = write_tag(&mut stream, OBJECT_IDENTIFIER, oid.len())?;
    stream.write_all(oid)?;

    Ok(tag_len + oid.len())
}

pub(crate) fn write_octet_string(mut stream: impl io::Write, value: &[u8]) -> io::Result<usize> {
    let tag_len = write_tag(&mut stream, OCTET_STRING, value.len())?;
    stream.write_all(value)?;

    Ok(tag_len + value.len())
}

pub(crate) fn write_enumerated(mut stream: impl io::Write, value: u8) -> io::Result<usize> {
    let tag_len = write_tag(&mut stream, ENUMERATED, 1)?;
    stream.write_u8(value)?;

    Ok(tag_len + 1)
}

pub(crate) fn read_enumerated<T: AsRef<[u8]>>(cursor: &mut io::Cursor<T>) -> io::Result<u8> {
    let length = read_expected_tag(cursor, ENUMERATED)?;
    if length != 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid enumerated length: {length}"),
        ));
    }

    cursor.read_u8()
}

/// Wraps an already encoded `content` into a `tag` header.
pub(crate) fn wrap(tag: u8, content: &[u8]) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(sizeof_tlv(content.len()));
    write_tag(&mut buffer, tag, content.len())?;
    buffer.extend_from_slice(content);

    Ok(buffer)
}
