use itertools::Itertools;

pub trait StringExtensions {
    /// Turn a user supplied name into a filename base.
    /// E.g. `"Sunset Beach!!".sanitize_base_name() == "sunset-beach"`
    fn sanitize_base_name(&self) -> String;

    /// Lowercase and trim a user supplied tag, `None` when nothing is left.
    fn normalize_tag(&self) -> Option<String>;
}

impl StringExtensions for str {
    fn sanitize_base_name(&self) -> String {
        self.to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '_' { '-' } else { c })
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .join("-")
    }

    fn normalize_tag(&self) -> Option<String> {
        let tag = self.split_whitespace().join(" ").to_lowercase();
        if tag.is_empty() { None } else { Some(tag) }
    }
}

impl StringExtensions for String {
    fn sanitize_base_name(&self) -> String {
        self.as_str().sanitize_base_name()
    }

    fn normalize_tag(&self) -> Option<String> {
        self.as_str().normalize_tag()
    }
}

#[test]
fn test_sanitize_base_name() {
    assert_eq!("Sunset Beach!!".sanitize_base_name(), "sunset-beach");
    assert_eq!("my_cool  photo".sanitize_base_name(), "my-cool-photo");
    assert_eq!("--Already--Hyphenated--".sanitize_base_name(), "already-hyphenated");
    assert_eq!("Café Déjà Vu 2024".sanitize_base_name(), "caf-dj-vu-2024");
    assert_eq!("!!!".sanitize_base_name(), "");
}

#[test]
fn test_normalize_tag() {
    assert_eq!("  nature ".normalize_tag(), Some("nature".to_string()));
    assert_eq!("black  and white".normalize_tag(), Some("black and white".to_string()));
    assert_eq!("Black And White".normalize_tag(), Some("black and white".to_string()));
    assert_eq!("   ".normalize_tag(), None);
}
