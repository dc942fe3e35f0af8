use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Filename = String;
pub type Tag = String;
pub type TvId = String;

/// Whole metadata document, as stored in `metadata.json`.
///
/// `images`, `tvs` and `tags` are required; anything else at the top level
/// is carried in `extra` and written back untouched.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct MetadataDocument {
    pub images: BTreeMap<Filename, ImageRecord>,
    pub tvs: Vec<TvRecord>,
    pub tags: BTreeSet<Tag>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetadataDocument {
    pub fn get_image(&self, filename: &str) -> Option<&ImageRecord> {
        self.images.get(filename)
    }

    /// Case-insensitive lookup, for collision checks on case-folding filesystems.
    pub fn find_image_ignore_case(&self, filename: &str) -> Option<&ImageRecord> {
        self.images.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(filename))
            .map(|(_, record)| record)
    }

    pub fn get_tv(&self, tv_id: &str) -> Option<&TvRecord> {
        self.tvs.iter().find(|tv| tv.id == tv_id)
    }

    pub fn get_tv_mut(&mut self, tv_id: &str) -> Option<&mut TvRecord> {
        self.tvs.iter_mut().find(|tv| tv.id == tv_id)
    }

    /// Adds every tag to the vocabulary, returning the ones that were new.
    pub fn ensure_tags<'a>(&mut self, tags: impl IntoIterator<Item = &'a Tag>) -> Vec<Tag> {
        tags.into_iter()
            .filter(|tag| self.tags.insert((*tag).clone()))
            .cloned()
            .collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageRecord {
    pub filename: Filename,
    #[serde(default)]
    pub matte: Matte,
    #[serde(default)]
    pub filter: PhotoFilter,
    #[serde(default)]
    pub tags: BTreeSet<Tag>,
    pub added: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageRecord {
    pub fn new(filename: Filename, dimensions: Dimensions) -> Self {
        Self {
            filename,
            matte: Matte::default(),
            filter: PhotoFilter::default(),
            tags: BTreeSet::new(),
            added: Utc::now(),
            dimensions: Some(dimensions),
            extra: Map::new(),
        }
    }

    pub fn is_untagged(&self) -> bool {
        self.tags.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TvRecord {
    pub id: TvId,
    pub name: String,
    pub ip: String,
    pub added: DateTime<Utc>,
    /// An empty set matches every image.
    #[serde(default)]
    pub tags: BTreeSet<Tag>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

macro_rules! open_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, Default)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            #[default]
            None,
            $($variant,)+
            /// A value written by a newer version, kept verbatim.
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    Self::None => "none",
                    $(Self::$variant => $text,)+
                    Self::Other(value) => value.as_str(),
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, Self::Other(_))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    "none" => Self::None,
                    $($text => Self::$variant,)+
                    _ => Self::Other(value),
                }
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

open_enum! {
    /// Frame TV matte style.
    Matte {
        ModernThin => "modernthin",
        Modern => "modern",
        ModernWide => "modernwide",
        Flexible => "flexible",
        Shadowbox => "shadowbox",
        Panoramic => "panoramic",
        Triptych => "triptych",
        Mix => "mix",
        Squares => "squares",
    }
}

open_enum! {
    /// Frame TV photo filter.
    PhotoFilter {
        Aqua => "aqua",
        ArtDeco => "artdeco",
        Ink => "ink",
        Wash => "wash",
        Pastel => "pastel",
        Feuve => "feuve",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "images": {
            "sunset-beach-a1b2c3d4.jpg": {
                "filename": "sunset-beach-a1b2c3d4.jpg",
                "matte": "shadowbox",
                "filter": "sepia-2030",
                "tags": ["nature", "beach"],
                "added": "2024-05-01T10:00:00Z",
                "dimensions": { "width": 3840, "height": 2160 },
                "favorite": true
            }
        },
        "tvs": [
            { "id": "tv-1700000000000", "name": "Living room", "ip": "192.168.1.20", "added": "2024-05-01T10:00:00Z", "tags": [], "model": "QN65LS03" }
        ],
        "tags": ["beach", "nature"],
        "version": 2
    }"#;

    #[test]
    fn unknown_fields_survive_round_trip() {
        let doc: MetadataDocument = serde_json::from_str(DOCUMENT).unwrap();
        let image = doc.get_image("sunset-beach-a1b2c3d4.jpg").unwrap();
        assert_eq!(image.extra.get("favorite"), Some(&Value::Bool(true)));
        assert_eq!(doc.tvs[0].extra.get("model"), Some(&Value::String("QN65LS03".to_string())));

        let reparsed: MetadataDocument = serde_json::from_str(&serde_json::to_string(&doc).unwrap()).unwrap();
        assert_eq!(reparsed, doc);
        assert_eq!(reparsed.extra.get("version"), Some(&Value::from(2)));
    }

    #[test]
    fn unknown_enum_values_are_kept() {
        let doc: MetadataDocument = serde_json::from_str(DOCUMENT).unwrap();
        let image = doc.get_image("sunset-beach-a1b2c3d4.jpg").unwrap();
        assert_eq!(image.matte, Matte::Shadowbox);
        assert_eq!(image.filter, PhotoFilter::Other("sepia-2030".to_string()));
        assert!(!image.filter.is_known());
        let json = serde_json::to_value(image).unwrap();
        assert_eq!(json["filter"], "sepia-2030");
    }

    #[test]
    fn missing_matte_and_filter_default_to_none() {
        let image: ImageRecord = serde_json::from_str(
            r#"{ "filename": "a-00000000.png", "added": "2024-05-01T10:00:00Z" }"#
        ).unwrap();
        assert_eq!(image.matte, Matte::None);
        assert_eq!(image.filter, PhotoFilter::None);
        assert!(image.is_untagged());
        assert_eq!(image.dimensions, None);
    }

    #[test]
    fn empty_enum_values_are_kept_verbatim() {
        let image: ImageRecord = serde_json::from_str(
            r#"{ "filename": "a-00000000.png", "added": "2024-05-01T10:00:00Z", "matte": "", "filter": "" }"#
        ).unwrap();
        assert_eq!(image.matte, Matte::Other(String::new()));
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["matte"], "");
        assert_eq!(json["filter"], "");
    }

    #[test]
    fn case_insensitive_lookup() {
        let doc: MetadataDocument = serde_json::from_str(DOCUMENT).unwrap();
        assert!(doc.find_image_ignore_case("Sunset-Beach-A1B2C3D4.JPG").is_some());
        assert!(doc.get_image("Sunset-Beach-A1B2C3D4.JPG").is_none());
    }
}
