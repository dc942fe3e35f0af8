use std::collections::BTreeSet;
use serde::Serialize;
use tracing::info;
use crate::entities::{Filename, ImageRecord, MetadataDocument, Tag, TvId, TvRecord};
use crate::error::{LibraryError, Result};
use crate::library::{ChangeSet, Library};
use crate::utils::str_utils::StringExtensions;

/// How much of a TV's tag set a selection covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMatch {
    Full,
    Partial,
    None,
}

impl TagMatch {
    /// A TV without tags shows everything, so any selection covers it fully.
    pub fn of(tv_tags: &BTreeSet<Tag>, selected: &BTreeSet<Tag>) -> Self {
        let covered = tv_tags.intersection(selected).count();
        match covered {
            _ if covered == tv_tags.len() => Self::Full,
            0 => Self::None,
            _ => Self::Partial,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TvMatch {
    pub id: TvId,
    pub name: String,
    pub state: TagMatch,
}

/// What a tag deletion touched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagRemoval {
    pub tag: Tag,
    pub images: Vec<Filename>,
    pub tvs: Vec<TvId>,
}

pub fn shown_on(tv: &TvRecord, image: &ImageRecord) -> bool {
    tv.tags.is_empty() || !tv.tags.is_disjoint(&image.tags)
}

/// Images a TV displays, in filename order.
pub fn images_for_tv<'a>(doc: &'a MetadataDocument, tv: &TvRecord) -> Vec<&'a ImageRecord> {
    doc.images.values().filter(|image| shown_on(tv, image)).collect()
}

fn parse_tag(name: &str) -> Result<Tag> {
    name.normalize_tag().ok_or_else(|| LibraryError::invalid("tag name is empty"))
}

impl Library {
    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        Ok(self.document().await?.tags.into_iter().collect())
    }

    /// Adds `name` to the vocabulary. Adding a known tag changes nothing.
    pub async fn add_tag(&self, name: &str) -> Result<(Tag, ChangeSet)> {
        let tag = parse_tag(name)?;
        let added = self.store().mutate(|doc| Ok(doc.tags.insert(tag.clone()))).await?;
        if !added {
            return Ok((tag, ChangeSet::default()));
        }
        info!("added tag '{}'", tag);
        let changes = self.metadata_change(format!("added tag {tag}"));
        Ok((tag, changes))
    }

    /// Removes `name` from the vocabulary and from every image and TV in one write.
    pub async fn delete_tag(&self, name: &str) -> Result<(TagRemoval, ChangeSet)> {
        let tag = parse_tag(name)?;
        let removal = self.store().mutate(|doc| {
            let mut removal = TagRemoval { tag: tag.clone(), ..Default::default() };
            let known = doc.tags.remove(&tag);
            for image in doc.images.values_mut() {
                if image.tags.remove(&tag) {
                    removal.images.push(image.filename.clone());
                }
            }
            for tv in doc.tvs.iter_mut() {
                if tv.tags.remove(&tag) {
                    removal.tvs.push(tv.id.clone());
                }
            }
            if !known && removal.images.is_empty() && removal.tvs.is_empty() {
                return Err(LibraryError::not_found(format!("tag '{tag}'")));
            }
            Ok(removal)
        }).await?;
        info!("deleted tag '{}' from {} image(s) and {} tv(s)", tag, removal.images.len(), removal.tvs.len());
        let changes = self.metadata_change(format!("deleted tag {tag}"));
        Ok((removal, changes))
    }

    /// Per TV selection state for a set of selected tags.
    pub async fn match_tvs(&self, selected: &[String]) -> Result<Vec<TvMatch>> {
        let selected = selected.iter().filter_map(|x| x.normalize_tag()).collect::<BTreeSet<Tag>>();
        Ok(self.document().await?.tvs.into_iter()
            .map(|tv| TvMatch { state: TagMatch::of(&tv.tags, &selected), id: tv.id, name: tv.name })
            .collect())
    }
}
