const DEFAULT_CURRENCY: &str = "$";
const CURRENCY_MARKERS: [&str; 5] = ["$", "usd", "byn", "руб", "р."];

/// Display form of a scraped price.
///
/// Text that already names a currency is kept as-is. Bare numbers get the
/// default currency; values of 1000 and above are read as cents.
pub fn normalize_price(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let lower = s.to_lowercase();
    if CURRENCY_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(s.to_string());
    }
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    match compact.replace(',', ".").parse::<f64>() {
        Ok(num) if num.is_finite() => Some(format_amount(num)),
        _ => Some(s.to_string()),
    }
}

fn format_amount(mut num: f64) -> String {
    if num >= 1000.0 {
        num /= 100.0;
    }
    if num.fract() == 0.0 {
        format!("{} {DEFAULT_CURRENCY}", num as i64)
    } else {
        format!("{num:.2} {DEFAULT_CURRENCY}")
    }
}
