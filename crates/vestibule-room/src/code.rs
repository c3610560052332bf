//! Room code generation.

use rand::Rng;
use vestibule_protocol::RoomCode;

/// The code alphabet. Visually ambiguous characters (I, L, O, 0, 1) are
/// excluded so codes survive being read aloud or copied from a stream
/// overlay.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Length of every room code.
pub const CODE_LEN: usize = 6;

/// Generates a random room code.
///
/// Uniqueness is NOT guaranteed here — the caller checks the store and
/// retries on collision. With a 31-character alphabet the space is
/// ~890 million codes, so collisions are rare but real.
pub fn generate_room_code() -> RoomCode {
    let mut rng = rand::rng();
    let code: String = (0..CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect();
    RoomCode::new(code)
}

/// Whether a string is a well-formed room code (right length, alphabet
/// characters only, after uppercasing).
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LEN
        && code
            .bytes()
            .all(|b| CODE_ALPHABET.contains(&b.to_ascii_uppercase()))
}

// =========================================================================
// Tests
// =========================================================================
