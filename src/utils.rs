pub fn string_to_utf16(value: &str) -> Vec<u8> {
    value
        .encode_utf16()
        .flat_map(|i| i.to_le_bytes().to_vec())
        .collect::<Vec<u8>>()
}

/// Decodes little-endian UTF-16. A trailing odd byte is ignored.
pub fn bytes_to_utf16_string(value: &[u8]) -> String {
    let value_u16 = value
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect::<Vec<u16>>();

    String::from_utf16_lossy(value_u16.as_ref())
}
