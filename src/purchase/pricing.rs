//! Token amount validation and payment computation
//!
//! Amounts are kept as an exact decimal (`mantissa / 10^scale`) so the
//! payment is `floor(mantissa * rate / 10^scale)` with no float rounding.

use serde::{Deserialize, Serialize};

use crate::errors::InvestError;

/// A validated, strictly positive token quantity as entered by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    raw: String,
    mantissa: u128,
    scale: u32,
}

impl TokenAmount {
    /// Parse `input`, allowing at most `decimals` fractional digits
    pub fn parse(input: &str, decimals: u32) -> Result<Self, InvestError> {
        let invalid = || InvestError::InvalidTokenAmount {
            input: input.to_string(),
            decimals,
        };

        let trimmed = input.trim();
        let (int_part, frac_part) = match trimmed.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (trimmed, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int_part) || !all_digits(frac_part) {
            return Err(invalid());
        }

        let scale = frac_part.len() as u32;
        if scale > decimals {
            return Err(invalid());
        }

        let mut mantissa: u128 = 0;
        for digit in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(u128::from(digit - b'0')))
                .ok_or_else(invalid)?;
        }
        if mantissa == 0 {
            return Err(invalid());
        }

        Ok(Self {
            raw: trimmed.to_string(),
            mantissa,
            scale,
        })
    }

    /// The amount as the user typed it (trimmed)
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Positive and no more fractional digits than the token declares
pub fn is_valid_token(input: &str, decimals: u32) -> bool {
    TokenAmount::parse(input, decimals).is_ok()
}

/// Payment in smallest currency units: `floor(tokens * rate)`
pub fn compute_payment(amount: &TokenAmount, rate: u128) -> Result<u128, InvestError> {
    let product = amount
        .mantissa
        .checked_mul(rate)
        .ok_or_else(|| InvestError::PaymentOverflow {
            tokens: amount.raw.clone(),
            rate,
        })?;
    // A divisor past u128::MAX exceeds any product, so the quotient is zero
    Ok(match 10u128.checked_pow(amount.scale) {
        Some(divisor) => product / divisor,
        None => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_whole_tokens() {
        let amount = TokenAmount::parse("2", 18).unwrap();
        assert_eq!(compute_payment(&amount, 1000).unwrap(), 2000);
    }

    #[test]
    fn test_fractional_tokens_truncate() {
        // 0.333 * 1000 = 333
        let amount = TokenAmount::parse("0.333", 18).unwrap();
        assert_eq!(compute_payment(&amount, 1000).unwrap(), 333);

        // 0.0007 * 1000 = 0.7 -> 0
        let amount = TokenAmount::parse("0.0007", 18).unwrap();
        assert_eq!(compute_payment(&amount, 1000).unwrap(), 0);

        // 1.5 * 3 = 4.5 -> 4
        let amount = TokenAmount::parse("1.5", 2).unwrap();
        assert_eq!(compute_payment(&amount, 3).unwrap(), 4);
    }

    #[test]
    fn test_decimal_places_boundary() {
        assert!(is_valid_token("1.12", 2));
        assert!(!is_valid_token("1.123", 2));
        assert!(is_valid_token("7", 0));
        assert!(!is_valid_token("7.5", 0));
        // Trailing zeros count as written
        assert!(!is_valid_token("1.50", 1));
    }

    #[test]
    fn test_rejects_non_positive_and_garbage() {
        for input in ["0", "0.000", "-1", "-0.5", "", "   ", ".", "abc", "1e3", "1.2.3", "+1", "0x10"] {
            assert!(!is_valid_token(input, 18), "{input:?} should be rejected");
        }
    }

    #[test]
    fn test_accepts_loose_decimal_forms() {
        assert!(is_valid_token(" 2 ", 18));
        assert!(is_valid_token(".5", 18));
        assert!(is_valid_token("5.", 18));
        assert_eq!(TokenAmount::parse(" 2 ", 18).unwrap().as_str(), "2");
    }

    #[test]
    fn test_error_carries_input() {
        let err = TokenAmount::parse("0.123", 2).unwrap_err();
        assert_eq!(
            err,
            InvestError::InvalidTokenAmount {
                input: "0.123".into(),
                decimals: 2
            }
        );
    }

    #[test]
    fn test_overflow_is_reported() {
        let amount = TokenAmount::parse("340282366920938463463374607431768211455", 0).unwrap();
        assert!(matches!(
            compute_payment(&amount, 2),
            Err(InvestError::PaymentOverflow { .. })
        ));
        assert!(!is_valid_token("340282366920938463463374607431768211456", 0));
    }

    proptest! {
        #[test]
        fn prop_payment_is_exact_truncation(
            int_part in 0u64..1_000_000,
            frac in 0u64..1_000_000,
            frac_digits in 0u32..=6,
            rate in 1u128..1_000_000_000_000_000_000,
        ) {
            let frac = frac % 10u64.pow(frac_digits);
            let input = if frac_digits == 0 {
                int_part.to_string()
            } else {
                format!("{}.{:0width$}", int_part, frac, width = frac_digits as usize)
            };
            prop_assume!(int_part > 0 || frac > 0);

            let amount = TokenAmount::parse(&input, 18).unwrap();
            let payment = compute_payment(&amount, rate).unwrap();

            let mantissa = u128::from(int_part) * 10u128.pow(frac_digits) + u128::from(frac);
            let divisor = 10u128.pow(frac_digits);
            let product = mantissa * rate;
            prop_assert!(payment * divisor <= product);
            prop_assert!(product < (payment + 1) * divisor);
        }

        #[test]
        fn prop_too_many_decimals_rejected(decimals in 0u32..18, int_part in 1u64..1000) {
            let input = format!("{}.{}", int_part, "1".repeat(decimals as usize + 1));
            prop_assert!(!is_valid_token(&input, decimals));
            let input = format!("{}.{}", int_part, "1".repeat(decimals as usize));
            prop_assert!(is_valid_token(input.trim_end_matches('.'), decimals));
        }
    }
}
