use crate::utils::str_utils::StringExtensions;

pub mod filename;
pub mod str_utils;

/// Normalizes a list of user supplied tags, dropping blanks and duplicates.
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut normalized = Vec::with_capacity(tags.len());
    for tag in tags.iter().filter_map(|x| x.as_ref().normalize_tag()) {
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}

/// Splits a comma separated tag list as sent in query strings and forms.
pub fn split_tags(raw: &str) -> Vec<String> {
    normalize_tags(&raw.split(',').collect::<Vec<&str>>())
}

#[test]
fn test_split_tags() {
    assert_eq!(split_tags("nature, sunset,,nature , "), vec!["nature".to_string(), "sunset".to_string()]);
    assert!(split_tags("").is_empty());
}
