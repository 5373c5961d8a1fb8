//! Domain Services
//!
//! Attendance code generation.

use crate::domain::value_objects::Code;
use platform::crypto::random_string;

/// Label-friendly alphabet: no `0/O`, `1/I/L`
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const CODE_MIN_LENGTH: usize = 2;
pub const CODE_MAX_GENERATED_LENGTH: usize = 8;
pub const DEFAULT_CODE_LENGTH: usize = 4;

/// Sequences that are never printed on a badge
const BLOCKED_SEQUENCES: &[&str] = &["ASS", "SEX", "KKK", "WTF", "XXX", "FUK", "DMN"];

pub fn is_valid_code_length(len: usize) -> bool {
    (CODE_MIN_LENGTH..=CODE_MAX_GENERATED_LENGTH).contains(&len)
}

pub fn is_printable(code: &str) -> bool {
    !BLOCKED_SEQUENCES.iter().any(|seq| code.contains(seq))
}

/// Random code of `len` characters from [`CODE_ALPHABET`]
///
/// Redraws until the code contains no blocked sequence. Uniqueness within
/// an issue date is left to the storage constraint.
pub fn generate_code(len: usize) -> Code {
    let len = len.clamp(CODE_MIN_LENGTH, CODE_MAX_GENERATED_LENGTH);
    loop {
        let candidate = random_string(CODE_ALPHABET, len);
        if !is_printable(&candidate) {
            continue;
        }
        if let Some(code) = Code::normalize(&candidate) {
            return code;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphabet_excludes_ambiguous() {
        for c in [b'0', b'O', b'1', b'I', b'L'] {
            assert!(!CODE_ALPHABET.contains(&c));
        }
    }

    #[test]
    fn test_generate_code_shape() {
        for _ in 0..200 {
            let code = generate_code(DEFAULT_CODE_LENGTH);
            assert_eq!(code.as_str().len(), DEFAULT_CODE_LENGTH);
            assert!(code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)));
            assert!(is_printable(code.as_str()));
        }
    }

    #[test]
    fn test_code_length_bounds() {
        assert!(!is_valid_code_length(1));
        assert!(is_valid_code_length(2));
        assert!(is_valid_code_length(4));
        assert!(is_valid_code_length(8));
        assert!(!is_valid_code_length(9));
    }

    #[test]
    fn test_blocked_sequences() {
        assert!(!is_printable("WTF2"));
        assert!(is_printable("K7QX"));
    }
}
