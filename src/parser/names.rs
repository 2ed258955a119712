//! Tool-name canonicalization.

/// Lowercased snake-case canonical form of a tool or argument name.
///
/// CamelCase boundaries split, spaces/hyphens/dots/slashes/underscores
/// become single underscores, any other non-alphanumeric character is
/// stripped, runs collapse and edges trim. Idempotent.
pub fn canonical(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_lower_or_digit = false;
    for ch in raw.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower_or_digit = false;
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            out.push(ch);
            prev_lower_or_digit = true;
        } else if matches!(ch, ' ' | '-' | '.' | '/' | '_') {
            out.push('_');
            prev_lower_or_digit = false;
        } else {
            prev_lower_or_digit = false;
        }
    }

    let mut collapsed = String::with_capacity(out.len());
    for ch in out.chars() {
        if ch == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(ch);
    }
    collapsed.trim_matches('_').to_string()
}
