use unicode_normalization::UnicodeNormalization;

/// Normalizes a name by stripping surrounding whitespace and composing
/// it into Unicode Normalization Form C.
///
/// ```
/// use recordings::normalization::normalize_name;
/// assert_eq!(normalize_name(" Gre\u{301}enlight "), "Gr\u{e9}enlight");
/// ```
pub fn normalize_name(name: impl AsRef<str>) -> String {
    name.as_ref().trim().nfc().collect()
}

/// Returns whether `name` contains `term`, ignoring case and Unicode
/// composition. A blank term matches everything.
///
/// ```
/// use recordings::normalization::matches_term;
/// assert!(matches_term("Greenlight 3", "LIGHT"));
/// assert!(matches_term("anything", "  "));
/// assert!(!matches_term("Greenlight", "red"));
/// ```
pub fn matches_term(name: impl AsRef<str>, term: impl AsRef<str>) -> bool {
    let term = fold(normalize_name(term));

    term.is_empty() || fold(name).contains(&term)
}

fn fold(s: impl AsRef<str>) -> String {
    s.as_ref().nfc().collect::<String>().to_lowercase()
}
