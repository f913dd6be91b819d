use serde::{Deserialize, Serialize};

const EARTH_RADIUS_MILES: f64 = 3958.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Great-circle (haversine) distance between two points, in miles.
pub fn distance_miles(a: Coordinates, b: Coordinates) -> f64 {
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_MILES * c
}

/// Extracts a 5-digit ZIP from the first digit run in free-form text
/// ("90210", "90210-1234", "zip 90210"). Returns None when the first digit
/// run is shorter than 5.
pub fn normalize_zip5(s: &str) -> Option<String> {
    let mut digits = String::with_capacity(5);
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 5 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.len() == 5 { Some(digits) } else { None }
}

/// True when the whole trimmed input is a bare postal code: 5 digits,
/// optionally followed by a dash and 4 more ("12345", "12345-6789").
pub fn is_postal_code(s: &str) -> bool {
    let s = s.trim();
    if !s.is_ascii() {
        return false;
    }
    let (zip5, rest) = if s.len() >= 5 {
        s.split_at(5)
    } else {
        return false;
    };
    if !zip5.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    match rest.strip_prefix('-') {
        None => rest.is_empty(),
        Some(plus4) => plus4.len() == 4 && plus4.chars().all(|c| c.is_ascii_digit()),
    }
}
