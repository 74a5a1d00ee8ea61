//! Order number generation.

use chrono::Utc;
use rand::Rng;

/// Generates a new order number: second-resolution timestamp, microsecond
/// fraction, and a 4-digit random suffix.
///
/// Numbers are time+random, not derived from request contents, so a blindly
/// retried request produces a second order. Callers that need retry safety
/// must supply their own idempotency key upstream.
pub fn generate_order_no() -> String {
    let now = Utc::now();
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!(
        "{}{:06}{:04}",
        now.format("%Y%m%d%H%M%S"),
        now.timestamp_subsec_micros(),
        suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let no = generate_order_no();
        assert_eq!(no.len(), 24);
        assert!(no.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_mostly_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(generate_order_no());
        }
        // Collisions require the same microsecond and the same random suffix.
        assert!(seen.len() > 90);
    }
}
