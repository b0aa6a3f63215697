//! Shareable session codes

use rand::Rng;

/// Uppercase letters and digits without look-alikes (0/O, 1/I/L)
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const SESSION_CODE_LEN: usize = 6;

/// Random code; uniqueness is enforced by the store
pub fn generate_session_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SESSION_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Uppercase and trim user input so codes compare case-insensitively
pub fn normalize_session_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
