//! Rule-based advisory text.

pub const HYDRATION: &str = "Drink plenty of water (2–3 liters daily)";
pub const UROLOGIST: &str = "Consider consultation with a urologist";
pub const URGENT: &str = "Urgent medical attention recommended";
pub const MONITOR: &str = "Monitor symptoms and pain levels";

pub const NO_STONES: [&str; 3] = [
    "No stones detected",
    "Continue regular health monitoring",
    "Maintain adequate hydration",
];

/// Largest stone (mm) above which a urologist consult is suggested.
pub const UROLOGIST_ABOVE_MM: f64 = 5.0;
/// Largest stone (mm) above which urgent attention is suggested.
pub const URGENT_ABOVE_MM: f64 = 10.0;

/// Ordered recommendations for a finding set.
pub fn recommendations(total_stones: usize, largest_stone_mm: f64) -> Vec<String> {
    if total_stones == 0 {
        return NO_STONES.iter().map(|s| s.to_string()).collect();
    }
    let mut out = vec![HYDRATION.to_string()];
    if largest_stone_mm > UROLOGIST_ABOVE_MM {
        out.push(UROLOGIST.to_string());
    }
    if largest_stone_mm > URGENT_ABOVE_MM {
        out.push(URGENT.to_string());
    }
    out.push(MONITOR.to_string());
    out
}
