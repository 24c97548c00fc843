use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(.*?\)").expect("valid regex"));
static VENUE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(racecourse|racetrack)\b").expect("valid regex"));

/// Accent- and case-folded key with apostrophes removed; `None` when nothing
/// comparable is left.
pub fn normalize_name(name: &str) -> Option<String> {
    let folded: String = name
        .chars()
        .filter(|ch| !is_apostrophe(*ch))
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .flat_map(char::to_lowercase)
        .collect();
    collapse_words(&folded)
}

pub fn normalize_venue(venue: &str) -> Option<String> {
    let stripped = BRACKETED.replace_all(venue, "");
    let stripped = VENUE_SUFFIX.replace_all(&stripped, "");
    collapse_words(&stripped.to_lowercase())
}

fn is_apostrophe(ch: char) -> bool {
    matches!(ch, '\'' | '`' | '\u{2018}' | '\u{2019}' | '\u{00B4}' | '\u{02BC}')
}

fn collapse_words(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for word in raw
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() { None } else { Some(out) }
}

#[cfg(test)]
mod tests {
    use super::{normalize_name, normalize_venue};

    #[test]
    fn apostrophes_and_spacing_fold_to_one_key() {
        let a = normalize_name("O'Brien's Dream");
        let b = normalize_name("OBriens Dream");
        let c = normalize_name("O\u{2019}Briens  Dream");
        assert_eq!(a.as_deref(), Some("obriens dream"));
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn accents_drop_to_base_letters() {
        assert_eq!(normalize_name("Café Société").as_deref(), Some("cafe societe"));
    }

    #[test]
    fn punctuation_only_is_no_identity() {
        assert_eq!(normalize_name(" -- "), None);
        assert_eq!(normalize_name(""), None);
    }

    #[test]
    fn venue_drops_brackets_and_suffix() {
        assert_eq!(
            normalize_venue("Flemington Racecourse (VIC)").as_deref(),
            Some("flemington")
        );
        assert_eq!(normalize_venue("Sandown-Hillside").as_deref(), Some("sandown hillside"));
    }
}
