// ABOUTME: Identifier generation and sanitization for sessions and files
// ABOUTME: Mints URL-safe random public ids and strips client input down to safe characters

use std::path::Path;

/// Alphabet used for public identifiers (URL-safe)
const ALPHABET: [char; 64] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S',
    'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l',
    'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4',
    '5', '6', '7', '8', '9', '-', '_',
];

/// Length of public session and file identifiers
pub const PUBLIC_ID_LENGTH: usize = 21;

/// Generate a random identifier of `size` characters from a secure source
pub fn generate_id(size: usize) -> String {
    nanoid::nanoid!(size, &ALPHABET)
}

pub fn generate_public_id() -> String {
    generate_id(PUBLIC_ID_LENGTH)
}

/// Keep only ASCII alphanumerics, `-` and `_`.
///
/// Applied to every client-supplied identifier before it reaches labels,
/// container names or filesystem paths.
pub fn sanitize_id(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Reduce a client filename to its base component.
///
/// Both `/` and `\` count as separators. Returns `None` when nothing usable
/// remains (empty, `.` or `..`).
pub fn sanitize_filename(input: &str) -> Option<String> {
    let normalized = input.replace('\\', "/");
    let base = Path::new(&normalized)
        .file_name()
        .map(|name| name.to_string_lossy().trim().to_string())
        .unwrap_or_default();

    match base.as_str() {
        "" | "." | ".." => None,
        _ => Some(base),
    }
}
