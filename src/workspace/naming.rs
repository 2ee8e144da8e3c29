//! Naming convention linking generated files back to their source.
//!
//! A generated file's stem is `{source_stem}_gen{N}`. Nothing else records
//! the relationship, so a source whose own stem already ends in `_genN` is
//! indistinguishable from a generated variant.

use regex::Regex;
use std::sync::LazyLock;

static GENERATED_STEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)_gen\d+$").expect("generated stem pattern is valid")
});

/// `{stem}_gen{index}{extension}`; `extension` includes the dot and falls
/// back to `.png` when empty.
pub fn generated_file_name(stem: &str, index: usize, extension: &str) -> String {
    let extension = if extension.is_empty() { ".png" } else { extension };
    format!("{}_gen{}{}", stem, index, extension)
}

/// Source stem a generated stem was derived from, if it follows the convention.
pub fn derived_source_stem(stem: &str) -> Option<&str> {
    GENERATED_STEM
        .captures(stem)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Whether `candidate` is `{source_stem}_genN`, optionally followed by the
/// `_M` copy suffix added when a generated name was already taken.
pub fn is_generated_from(candidate: &str, source_stem: &str) -> bool {
    let Some(rest) = candidate
        .strip_prefix(source_stem)
        .and_then(|rest| rest.strip_prefix("_gen"))
    else {
        return false;
    };

    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match rest.split_once('_') {
        Some((index, copy)) => digits(index) && digits(copy),
        None => digits(rest),
    }
}

/// Drop a trailing `_genN` from a stem, leaving other stems untouched.
pub fn strip_generated_suffix(stem: &str) -> &str {
    derived_source_stem(stem).unwrap_or(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_file_name() {
        assert_eq!(generated_file_name("cat", 1, ".png"), "cat_gen1.png");
        assert_eq!(generated_file_name("cat", 12, ".JPG"), "cat_gen12.JPG");
        assert_eq!(generated_file_name("cat", 2, ""), "cat_gen2.png");
    }

    #[test]
    fn test_derived_source_stem() {
        assert_eq!(derived_source_stem("cat_gen1"), Some("cat"));
        assert_eq!(derived_source_stem("my_cat_gen27"), Some("my_cat"));
        assert_eq!(derived_source_stem("cat_gen1_gen2"), Some("cat_gen1"));
        assert_eq!(derived_source_stem("cat"), None);
        assert_eq!(derived_source_stem("cat_gen"), None);
        assert_eq!(derived_source_stem("cat_generic"), None);
    }

    #[test]
    fn test_is_generated_from() {
        assert!(is_generated_from("cat_gen1", "cat"));
        assert!(is_generated_from("cat_gen12_3", "cat"));
        assert!(!is_generated_from("cat_generic_gen1", "cat"));
        assert!(is_generated_from("cat_generic_gen1", "cat_generic"));
        assert!(!is_generated_from("cat_gen", "cat"));
        assert!(!is_generated_from("cat_gen1_", "cat"));
        assert!(!is_generated_from("dog_gen1", "cat"));
        assert!(!is_generated_from("cat", "cat"));
    }

    #[test]
    fn test_strip_generated_suffix() {
        assert_eq!(strip_generated_suffix("cat_gen3"), "cat");
        assert_eq!(strip_generated_suffix("dog"), "dog");
    }
}
