//! Subdomain generation and validation.

use rand::seq::IndexedRandom;

/// Length of generated subdomain labels.
pub const GENERATED_SUBDOMAIN_LEN: usize = 15;
/// Longest DNS label accepted for a requested subdomain.
const MAX_LABEL_LEN: usize = 63;
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
/// Container id characters kept in tunnel names.
const TUNNEL_NAME_ID_CHARS: usize = 12;

/// Generates a random lowercase alphanumeric label.
#[must_use]
pub fn generate_subdomain() -> String {
    let mut rng = rand::rng();
    (0..GENERATED_SUBDOMAIN_LEN)
        .filter_map(|_| ALPHABET.choose(&mut rng).copied().map(char::from))
        .collect()
}

/// Checks a requested label: 1-63 characters of `[a-z0-9-]`, not starting
/// or ending with a hyphen.
#[must_use]
pub fn is_valid_subdomain(label: &str) -> bool {
    let length = label.chars().count();
    (1..=MAX_LABEL_LEN).contains(&length)
        && label
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        && !label.starts_with('-')
        && !label.ends_with('-')
}

/// Name of the external tunnel created for a container.
#[must_use]
pub fn tunnel_name(container_id: &str) -> String {
    let short: String = container_id.chars().take(TUNNEL_NAME_ID_CHARS).collect();
    format!("tunnel-{short}")
}
