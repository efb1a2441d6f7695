//! `%{name}` substitution from document metadata.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

static METAVAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%\{(.*?)\}").expect("valid metavar regex"));

/// Replace every known `%{name}`; unknown names are left untouched.
///
/// Returns `None` when nothing changed.
pub fn substitute(text: &str, metadata: &BTreeMap<String, String>) -> Option<String> {
    if !text.contains("%{") {
        return None;
    }

    let mut changed = false;
    let out = METAVAR_RE.replace_all(text, |caps: &Captures| match metadata.get(&caps[1]) {
        Some(value) => {
            changed = true;
            value.clone()
        }
        None => caps[0].to_string(),
    });

    changed.then(|| out.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("title".to_string(), "Caching".to_string()),
            ("term".to_string(), "WS 2026".to_string()),
        ])
    }

    #[test]
    fn replaces_known_names() {
        assert_eq!(
            substitute("%{title} (%{term})", &meta()).as_deref(),
            Some("Caching (WS 2026)")
        );
    }

    #[test]
    fn unknown_names_untouched() {
        assert_eq!(substitute("%{nope}", &meta()), None);
        assert_eq!(
            substitute("%{nope} %{title}", &meta()).as_deref(),
            Some("%{nope} Caching")
        );
        assert_eq!(substitute("plain", &meta()), None);
    }
}
