use md5::{Digest, Md5};

pub const HASH_SIZE: usize = 16;

pub fn compute_md5(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut context = Md5::new();
    let mut result = [0x00; HASH_SIZE];
    context.update(data);
    result.clone_from_slice(&context.finalize());

    result
}

/// MD5 over `key || salt`, truncated to `key.len()` bytes (at most [`HASH_SIZE`]).
pub fn fold_key(key: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut value = key.to_vec();
    value.extend_from_slice(salt);

    let digest = compute_md5(&value);
    digest[..key.len().min(HASH_SIZE)].to_vec()
}
