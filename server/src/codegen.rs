use rand::Rng;

/// Length of generated short codes unless configured otherwise.
pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Longest shortcode the store accepts.
pub const MAX_CODE_LENGTH: usize = 32;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random alphanumeric string of the given length.
///
/// Uses the thread-local RNG, so concurrent callers never contend on shared
/// state. Uniqueness is the caller's problem.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// `true` for 1–32 ASCII letters or digits.
pub fn is_valid_shortcode(code: &str) -> bool {
    (1..=MAX_CODE_LENGTH).contains(&code.len())
        && code.bytes().all(|b| b.is_ascii_alphanumeric())
}
