//! Tracking number generation.
//!
//! A tracking number is `ST`, the last eight digits of the creation time in
//! milliseconds, then four random base-36 characters. Uniqueness is not
//! implied by the format; the creation flow checks the store and retries.

use chrono::Utc;
use rand::Rng;

pub const PREFIX: &str = "ST";
pub const LENGTH: usize = 14;

const TIME_DIGITS: i64 = 100_000_000;
const SUFFIX_LEN: usize = 4;
const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub fn generate() -> String {
    generate_at(Utc::now().timestamp_millis(), &mut rand::rng())
}

pub fn generate_at<R: Rng + ?Sized>(millis: i64, rng: &mut R) -> String {
    let mut number = format!("{}{:08}", PREFIX, millis.rem_euclid(TIME_DIGITS));
    for _ in 0..SUFFIX_LEN {
        let idx = rng.random_range(0..ALPHABET.len());
        number.push(ALPHABET[idx] as char);
    }
    number
}

/// Checks the shape of a tracking number without consulting the store.
pub fn is_well_formed(candidate: &str) -> bool {
    let Some(rest) = candidate.strip_prefix(PREFIX) else {
        return false;
    };
    let rest = rest.as_bytes();
    candidate.len() == LENGTH
        && rest[..8].iter().all(|b| b.is_ascii_digit())
        && rest[8..].iter().all(|b| ALPHABET.contains(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn uses_last_eight_digits_of_the_clock() {
        let mut rng = StdRng::seed_from_u64(7);
        let number = generate_at(1_718_000_123_456, &mut rng);
        assert!(number.starts_with("ST00123456"), "{number}");
        assert_eq!(number.len(), LENGTH);
    }

    #[test]
    fn pads_short_clock_values() {
        let mut rng = StdRng::seed_from_u64(1);
        let number = generate_at(42, &mut rng);
        assert_eq!(&number[..10], "ST00000042");
    }

    #[test]
    fn generated_numbers_are_well_formed() {
        let mut rng = StdRng::seed_from_u64(99);
        for millis in (0..2_000_000_000_000i64).step_by(97_000_000_001) {
            let number = generate_at(millis, &mut rng);
            assert!(is_well_formed(&number), "{number}");
            assert!(number[2..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        }
        for _ in 0..100 {
            assert!(is_well_formed(&generate()));
        }
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("ST1234567ABCD"));
        assert!(!is_well_formed("XX12345678ABCD"));
        assert!(!is_well_formed("ST12345678abcd"));
        assert!(!is_well_formed("ST1234567XABCD"));
        assert!(is_well_formed("ST12345678AB9Z"));
    }
}
