use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SLUG_NONPRINTABLE: Regex = Regex::new(r#"[^ -~]"#).unwrap();
    static ref SLUG_NONALPHARUNS: Regex = Regex::new(r#"[^a-zA-Z0-9]+"#).unwrap();
    static ref SLUG_STARTENDHYPHENS: Regex = Regex::new(r#"^-|-$"#).unwrap();
}

/// Lowercased, URL-safe form of a title. Non-printable characters are
/// dropped, runs of anything else become a single hyphen.
pub fn sluggify<S: AsRef<str>>(data: S) -> String {
    let data: &str = data.as_ref();
    let data = SLUG_NONPRINTABLE.replace_all(data, "");
    let data = SLUG_NONALPHARUNS.replace_all(&data, "-");
    let data = SLUG_STARTENDHYPHENS.replace_all(&data, "");
    data.to_ascii_lowercase()
}
