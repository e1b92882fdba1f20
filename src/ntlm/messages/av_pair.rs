use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{Error, ErrorKind, Result};

pub(crate) const AV_PAIR_EOL: u16 = 0;
pub(crate) const AV_PAIR_NB_COMPUTER_NAME: u16 = 1;
pub(crate) const AV_PAIR_NB_DOMAIN_NAME: u16 = 2;
pub(crate) const AV_PAIR_DNS_COMPUTER_NAME: u16 = 3;
pub(crate) const AV_PAIR_DNS_DOMAIN_NAME: u16 = 4;
pub(crate) const AV_PAIR_DNS_TREE_NAME: u16 = 5;
pub(crate) const AV_PAIR_FLAGS: u16 = 6;
pub(crate) const AV_PAIR_TIMESTAMP: u16 = 7;

const AV_PAIR_ID_SIZE: usize = 2;
const AV_PAIR_LEN_SIZE: usize = 2;
const AV_PAIR_FLAGS_SIZE: usize = 4;
const AV_PAIR_TIMESTAMP_SIZE: usize = 8;

/// One entry of the target information list carried by CHALLENGE messages.
///
/// Names are kept as raw UTF-16LE bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AvPair {
    EOL,
    NbComputerName(Vec<u8>),
    NbDomainName(Vec<u8>),
    DnsComputerName(Vec<u8>),
    DnsDomainName(Vec<u8>),
    DnsTreeName(Vec<u8>),
    Flags(u32),
    Timestamp(u64),
    Other(u16, Vec<u8>),
}

impl AvPair {
    pub(crate) fn as_u16(&self) -> u16 {
        match self {
            AvPair::EOL => AV_PAIR_EOL,
            AvPair::NbComputerName(_) => AV_PAIR_NB_COMPUTER_NAME,
            AvPair::NbDomainName(_) => AV_PAIR_NB_DOMAIN_NAME,
            AvPair::DnsComputerName(_) => AV_PAIR_DNS_COMPUTER_NAME,
            AvPair::DnsDomainName(_) => AV_PAIR_DNS_DOMAIN_NAME,
            AvPair::DnsTreeName(_) => AV_PAIR_DNS_TREE_NAME,
            AvPair::Flags(_) => AV_PAIR_FLAGS,
            AvPair::Timestamp(_) => AV_PAIR_TIMESTAMP,
            AvPair::Other(id, _) => *id,
        }
    }

    pub(crate) fn list_to_buffer(av_pairs: &[AvPair]) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(av_pairs.iter().map(AvPair::encoded_len).sum());
        for av_pair in av_pairs {
            av_pair.write_to(&mut buffer)?;
        }

        Ok(buffer)
    }

    /// Parses a list up to and including its `MsvAvEOL` terminator.
    pub(crate) fn buffer_to_av_pairs(mut buffer: &[u8]) -> Result<Vec<AvPair>> {
        let mut av_pairs = Vec::new();

        loop {
            let av_pair = AvPair::read_from(&mut buffer)?;
            let is_eol = av_pair == AvPair::EOL;
            av_pairs.push(av_pair);

            if is_eol {
                return Ok(av_pairs);
            }
        }
    }

    fn value_len(&self) -> usize {
        match self {
            AvPair::EOL => 0,
            AvPair::NbComputerName(value)
            | AvPair::NbDomainName(value)
            | AvPair::DnsComputerName(value)
            | AvPair::DnsDomainName(value)
            | AvPair::DnsTreeName(value)
            | AvPair::Other(_, value) => value.len(),
            AvPair::Flags(_) => AV_PAIR_FLAGS_SIZE,
            AvPair::Timestamp(_) => AV_PAIR_TIMESTAMP_SIZE,
        }
    }

    fn encoded_len(&self) -> usize {
        AV_PAIR_ID_SIZE + AV_PAIR_LEN_SIZE + self.value_len()
    }

    fn write_to(&self, mut stream: impl io::Write) -> io::Result<()> {
        let length = u16::try_from(self.value_len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "AV pair value is too long"))?;

        stream.write_u16::<LittleEndian>(self.as_u16())?;
        stream.write_u16::<LittleEndian>(length)?;

        match self {
            AvPair::EOL => Ok(()),
            AvPair::NbComputerName(value)
            | AvPair::NbDomainName(value)
            | AvPair::DnsComputerName(value)
            | AvPair::DnsDomainName(value)
            | AvPair::DnsTreeName(value)
            | AvPair::Other(_, value) => stream.write_all(value),
            AvPair::Flags(value) => stream.write_u32::<LittleEndian>(*value),
            AvPair::Timestamp(value) => stream.write_u64::<LittleEndian>(*value),
        }
    }

    fn read_from(mut stream: impl io::Read) -> Result<AvPair> {
        let id = stream.read_u16::<LittleEndian>()?;
        let length = usize::from(stream.read_u16::<LittleEndian>()?);

        let mut value = vec![0x00; length];
        stream.read_exact(&mut value)?;

        let av_pair = match id {
            AV_PAIR_EOL => AvPair::EOL,
            AV_PAIR_NB_COMPUTER_NAME => AvPair::NbComputerName(value),
            AV_PAIR_NB_DOMAIN_NAME => AvPair::NbDomainName(value),
            AV_PAIR_DNS_COMPUTER_NAME => AvPair::DnsComputerName(value),
            AV_PAIR_DNS_DOMAIN_NAME => AvPair::DnsDomainName(value),
            AV_PAIR_DNS_TREE_NAME => AvPair::DnsTreeName(value),
            AV_PAIR_FLAGS => AvPair::Flags(read_fixed(&value, AV_PAIR_FLAGS_SIZE, id)?.read_u32::<LittleEndian>()?),
            AV_PAIR_TIMESTAMP => {
                AvPair::Timestamp(read_fixed(&value, AV_PAIR_TIMESTAMP_SIZE, id)?.read_u64::<LittleEndian>()?)
            }
            _ => AvPair::Other(id, value),
        };

        Ok(av_pair)
    }
}

fn read_fixed(value: &[u8], expected: usize, id: u16) -> Result<impl Read + '_> {
    if value.len() != expected {
        return Err(Error::new(
            ErrorKind::InvalidToken,
            format!("AV pair {id} must be {expected} bytes long, got {}", value.len()),
        ));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_is_terminated_and_parsed_back() {
        let av_pairs = vec![
            AvPair::NbDomainName(vec![0x44, 0x00]),
            AvPair::Timestamp(0x01D9_0000_0000_0000),
            AvPair::Other(0x0009, vec![0x01, 0x02]),
            AvPair::EOL,
        ];

        let buffer = AvPair::list_to_buffer(&av_pairs).unwrap();
        assert_eq!(&buffer[buffer.len() - 4..], [0x00; 4]);
        assert_eq!(AvPair::buffer_to_av_pairs(&buffer).unwrap(), av_pairs);
    }

    #[test]
    fn missing_terminator_is_invalid() {
        let buffer = AvPair::list_to_buffer(&[AvPair::Flags(2)]).unwrap();
        let err = AvPair::buffer_to_av_pairs(&buffer).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::InvalidToken);
    }

    #[test]
    fn timestamp_with_wrong_length_is_invalid() {
        let buffer = [0x07, 0x00, 0x04, 0x00, 0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x00, 0x00];

        assert!(AvPair::buffer_to_av_pairs(&buffer).is_err());
    }
}
