/// Render an amount in base units with a fixed number of decimals.
///
/// Works on the decimal digits directly, so every digit is kept for any number of decimals.
/// Trailing zeros are not trimmed.
pub fn format_coin_amount(amount: i64, decimals: u32) -> String {
	let sign = if amount < 0 { "-" } else { "" };
	let digits = amount.unsigned_abs().to_string();
	let decimals = decimals as usize;
	if decimals == 0 {
		return format!("{}{}", sign, digits);
	}

	let padded = format!("{:0>width$}", digits, width = decimals + 1);
	let (whole, fraction) = padded.split_at(padded.len() - decimals);
	format!("{}{}.{}", sign, whole, fraction)
}
