//! Best-effort state/country derivation from free-text addresses.
//!
//! This is a heuristic over comma-separated segments, not a geocoder.

/// Country assumed when the last address segment is a bare postal code.
pub const POSTAL_CODE_COUNTRY: &str = "United States";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    pub state: String,
    pub country: String,
}

impl Region {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_empty() && self.country.is_empty()
    }
}

/// Derive `(state, country)` from an address.
///
/// Fewer than three segments yields an empty region. A purely numeric last
/// segment is treated as a US postal code; otherwise the last segment is the
/// country and the state is only taken when at least four segments exist.
#[must_use]
pub fn classify(address: &str) -> Region {
    let parts = address.split(',').map(str::trim).collect::<Vec<_>>();
    if parts.len() < 3 {
        return Region::default();
    }

    let last = parts[parts.len() - 1];
    let second_to_last = parts[parts.len() - 2];

    if is_postal_code(last) {
        return Region {
            state: second_to_last.to_string(),
            country: POSTAL_CODE_COUNTRY.to_string(),
        };
    }

    let state = if parts.len() >= 4 { second_to_last.to_string() } else { String::new() };

    Region { state, country: last.to_string() }
}

fn is_postal_code(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}
