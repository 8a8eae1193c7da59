use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Compact, fixed-width rendering of a count: `  1.23K`, ` 45.67M`.
/// Values of 13 or more digits (and below 1000) print in full.
pub fn ui_num(n: u64) -> String {
    let digits = n.to_string();
    let (unit, exp) = match digits.len() {
        4..=6 => ('K', 3),
        7..=9 => ('M', 6),
        10..=12 => ('G', 9),
        _ => return digits,
    };
    let whole = digits.len() - exp;
    format!("{:>3}.{}{unit}", &digits[..whole], &digits[whole..whole + 2])
}

/// UTC timestamp to the minute.
pub fn ui_time(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).format("%Y-%m-%d %H:%M").to_string()
}

/// Listing marker: blank when something outside the cache links the object.
pub fn link_marker(nlink: u64) -> char {
    if nlink > 1 {
        ' '
    } else {
        '*'
    }
}
