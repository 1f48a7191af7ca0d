//! One-time upload codes and the failed-attempt backoff.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::calendar::Timestamp;
use crate::error::OtpError;
use crate::ingestion::IngestionState;

/// Characters an OTP is drawn from.
const ALPHABET: [char; 25] = [
    'A', 'E', 'F', 'H', 'I', 'J', 'K', 'L', 'Q', 'R', 'S', 'U', 'W', 'X', 'Y', 'Z', '1', '2', '3',
    '4', '5', '6', '7', '8', '9',
];

pub const OTP_LENGTH: usize = 10;
const CUN_PREFIX: &str = "CUN-";

/// Base of the backoff after a failed validation, doubled per failure.
const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_MAX_SECS: u64 = 1_800;

fn even_value(c: char) -> Option<u32> {
    match c {
        '0'..='9' => c.to_digit(10),
        'A'..='Z' => Some(c as u32 - 'A' as u32),
        _ => None,
    }
}

fn odd_value(c: char) -> Option<u32> {
    const DIGITS: [u32; 10] = [1, 0, 5, 7, 9, 13, 15, 17, 19, 21];
    const LETTERS: [u32; 26] = [
        1, 0, 5, 7, 9, 13, 15, 17, 19, 21, 2, 4, 18, 20, 11, 3, 6, 8, 12, 14, 16, 10, 22, 25, 24,
        23,
    ];
    match c {
        '0'..='9' => Some(DIGITS[(c as u32 - '0' as u32) as usize]),
        'A'..='Z' => Some(LETTERS[(c as u32 - 'A' as u32) as usize]),
        _ => None,
    }
}

fn check_digit(code: &[char]) -> Option<char> {
    let mut sum = 0;
    for (index, c) in code.iter().enumerate() {
        // Positions are counted from 1.
        sum += if (index + 1) % 2 == 0 {
            even_value(*c)?
        } else {
            odd_value(*c)?
        };
    }
    Some(ALPHABET[sum as usize % ALPHABET.len()])
}

/// A one-time code authorizing a diagnosis-key upload, or a CUN issued by a
/// health authority.
#[derive(Clone, PartialEq, Eq)]
pub struct Otp {
    raw: String,
}

impl Otp {
    /// Random valid code of the default length.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut chars: Vec<char> = (0..OTP_LENGTH - 1)
            .filter_map(|_| ALPHABET.choose(rng).copied())
            .collect();
        if let Some(digit) = check_digit(&chars) {
            chars.push(digit);
        }
        Self {
            raw: chars.into_iter().collect(),
        }
    }

    /// A CUN; it carries no check digit.
    pub fn cun(code: &str) -> Self {
        Self {
            raw: format!("{CUN_PREFIX}{}", code.trim().to_ascii_uppercase()),
        }
    }

    pub fn is_cun(&self) -> bool {
        self.raw.starts_with(CUN_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Hex SHA-256 of the code, sent as bearer token.
    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(self.raw.as_bytes()))
    }

    /// `["AAA", "BBBB", "CCC"]` for display.
    pub fn code_parts(&self) -> Vec<String> {
        let chars: Vec<char> = self.raw.chars().collect();
        let part = OTP_LENGTH / 3;
        if chars.len() < 2 * part {
            return vec![self.raw.clone()];
        }
        let (head, rest) = chars.split_at(part);
        let (middle, tail) = rest.split_at(rest.len() - part);
        [head, middle, tail]
            .iter()
            .map(|p| p.iter().collect())
            .collect()
    }
}

impl FromStr for Otp {
    type Err = OtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_uppercase();
        let chars: Vec<char> = raw.chars().collect();
        if chars.len() <= 2 {
            return Err(OtpError::Malformed);
        }
        let (code, last) = chars.split_at(chars.len() - 1);
        match check_digit(code) {
            Some(expected) if expected == last[0] => Ok(Self { raw }),
            _ => Err(OtpError::Malformed),
        }
    }
}

impl fmt::Debug for Otp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Otp(<redacted>)")
    }
}

/// Seconds to wait after `failed_attempts` consecutive failures.
pub fn backoff_secs(failed_attempts: u32) -> u64 {
    if failed_attempts == 0 {
        return 0;
    }
    let exponent = (failed_attempts - 1).min(16);
    (BACKOFF_BASE_SECS << exponent).min(BACKOFF_MAX_SECS)
}

/// Seconds left before a new attempt is allowed, or `None` if one may go now.
pub fn remaining_backoff(state: &IngestionState, now: Timestamp) -> Option<u64> {
    let last = state.last_otp_upload_failed_attempt?;
    let wait = backoff_secs(state.otp_upload_failed_attempts) as i64;
    let elapsed = (now - last).num_seconds();
    (elapsed < wait).then(|| (wait - elapsed) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Mcg128Xsl64;

    #[test]
    fn generated_codes_verify() {
        let mut rng = Mcg128Xsl64::seed_from_u64(11);
        for _ in 0..50 {
            let otp = Otp::generate(&mut rng);
            assert_eq!(otp.as_str().len(), OTP_LENGTH);
            assert_eq!(otp.as_str().parse::<Otp>().unwrap(), otp);
        }
    }

    #[test]
    fn corrupted_check_digit_is_rejected() {
        let mut rng = Mcg128Xsl64::seed_from_u64(5);
        let otp = Otp::generate(&mut rng);
        let mut chars: Vec<char> = otp.as_str().chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'A' { 'E' } else { 'A' };
        let corrupted: String = chars.into_iter().collect();
        assert_eq!(corrupted.parse::<Otp>(), Err(OtpError::Malformed));
        assert_eq!("AB".parse::<Otp>(), Err(OtpError::Malformed));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let otp = Otp::cun("abc");
        assert_eq!(otp.as_str(), "CUN-ABC");
        assert!(otp.is_cun());
        let hash = otp.sha256();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn code_parts_split_three_four_three() {
        let mut rng = Mcg128Xsl64::seed_from_u64(2);
        let otp = Otp::generate(&mut rng);
        let parts = otp.code_parts();
        assert_eq!(parts.iter().map(String::len).collect::<Vec<_>>(), vec![3, 4, 3]);
        assert_eq!(parts.concat(), otp.as_str());
    }

    #[test]
    fn debug_does_not_leak_the_code() {
        let otp = Otp::cun("SECRET");
        assert!(!format!("{otp:?}").contains("SECRET"));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(backoff_secs(0), 0);
        assert_eq!(backoff_secs(1), 5);
        assert_eq!(backoff_secs(2), 10);
        assert_eq!(backoff_secs(4), 40);
        assert_eq!(backoff_secs(9), 1_280);
        assert_eq!(backoff_secs(10), 1_800);
        assert_eq!(backoff_secs(40), 1_800);
    }
}
