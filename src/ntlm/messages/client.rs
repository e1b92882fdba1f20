mod authenticate;
mod challenge;
mod negotiate;
#[cfg(test)]
mod test;

pub(crate) use self::authenticate::write_authenticate;
pub use self::challenge::locate_server_challenge;
pub(crate) use self::challenge::{read_challenge, ChallengeMessage};
pub(crate) use self::negotiate::write_negotiate;
