//! Suffix-aware numeric parsing for market caps and prices

/// Parse an amount such as `"12.5K"`, `"$3M"` or `"1,200"`.
///
/// Commas and `$` are stripped, a trailing `K`/`M`/`B` (any case) scales by
/// 10³/10⁶/10⁹. Anything that still fails to parse yields `0.0`.
pub fn parse_amount(value: &str) -> f64 {
    let cleaned: String = value
        .to_lowercase()
        .chars()
        .filter(|c| *c != ',' && *c != '$')
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return 0.0;
    }

    let (number, multiplier) = match cleaned.chars().last() {
        Some('k') => (&cleaned[..cleaned.len() - 1], 1_000.0),
        Some('m') => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        Some('b') => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned, 1.0),
    };

    number
        .trim()
        .parse::<f64>()
        .map(|n| n * multiplier)
        .unwrap_or(0.0)
}
