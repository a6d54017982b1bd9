//! Display rounding shared by every report view.

/// Round to two decimal places (diameters, burden).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Millimeter value as shown in text views.
pub fn mm(value: f64) -> String {
    format!("{:.2}", round2(value))
}

/// Confidence as a one-decimal percentage.
pub fn percent(confidence: f64) -> String {
    format!("{:.1}%", confidence * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_for_display() {
        assert_eq!(round2(12.5), 12.5);
        assert_eq!(round2(1.23456), 1.23);
        assert_eq!(round2(0.875), 0.88);
        assert_eq!(mm(4.5), "4.50");
        assert_eq!(percent(0.85), "85.0%");
        assert_eq!(percent(0.7251), "72.5%");
    }
}
