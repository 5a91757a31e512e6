use crate::codec::Amount;
use num_bigint::Sign;

/// Render an integer amount of the smallest token unit with `decimals` fractional digits.
///
/// Exact for amounts of any size.
pub fn format_token_amount(amount: &Amount, decimals: u32) -> String {
    let value = amount.to_bigint();
    let sign = if value.sign() == Sign::Minus { "-" } else { "" };
    let digits = value.magnitude().to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return format!("{sign}{digits}");
    }

    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    format!("{sign}{whole}.{fraction}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_small_and_negative_amounts() {
        assert_eq!(format_token_amount(&Amount::Safe(5), 2), "0.05");
        assert_eq!(format_token_amount(&Amount::Safe(-1234), 2), "-12.34");
        assert_eq!(format_token_amount(&Amount::Safe(0), 2), "0.00");
        assert_eq!(format_token_amount(&Amount::Safe(42), 0), "42");
    }

    #[test]
    fn formats_big_amounts_exactly() {
        let amount: Amount = "12345678901234567891".parse().unwrap();
        assert_eq!(format_token_amount(&amount, 2), "123456789012345678.91");
    }
}
