use rand::Rng;
use sha1::{Digest, Sha1};

/// Lowest port a caller identity draws from.
///
/// The first three hex digits of `sha1(user + discriminator)` (0..=4095)
/// are subtracted from `seed`, so each user/server-kind pair gets its own
/// repeatable slice of the high port range.
pub fn port_base(user: &str, discriminator: &str, seed: u16) -> u16 {
    let mut hasher = Sha1::new();
    hasher.update(user.as_bytes());
    hasher.update(discriminator.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let offset = u16::from_str_radix(&digest[..3], 16).unwrap_or(0);
    seed.saturating_sub(offset)
}

/// Candidate generator returning uniform random ports in `[base, 65535]`.
pub fn seeded_candidate(user: &str, discriminator: &str, seed: u16) -> impl FnMut() -> u16 {
    let base = port_base(user, discriminator, seed);
    let mut rng = rand::thread_rng();
    move || rng.gen_range(base..=u16::MAX)
}
