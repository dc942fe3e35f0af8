use std::collections::BTreeSet;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use crate::entities::{ImageRecord, Tag, TvId, TvRecord};
use crate::error::{LibraryError, Result};
use crate::library::{ChangeSet, Library};
use crate::tags::images_for_tv;
use crate::utils::normalize_tags;

#[derive(Debug, Clone, Deserialize)]
pub struct NewTv {
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TvUpdate {
    pub name: Option<String>,
    pub ip: Option<String>,
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(LibraryError::invalid(format!("{field} is empty")));
    }
    Ok(value.to_string())
}

fn address(value: &str) -> Result<String> {
    let value = required("ip", value)?;
    if value.contains(char::is_whitespace) {
        return Err(LibraryError::invalid(format!("'{value}' is not a valid address")));
    }
    Ok(value)
}

/// `tv-{unix millis}`, with `-{n}` appended when that id is already taken.
fn next_tv_id(existing: &[TvRecord], millis: i64) -> TvId {
    let taken = |id: &str| existing.iter().any(|tv| tv.id == id);
    let base = format!("tv-{millis}");
    let mut id = base.clone();
    let mut n = 0;
    while taken(&id) {
        n += 1;
        id = format!("{base}-{n}");
    }
    id
}

impl Library {
    pub async fn list_tvs(&self) -> Result<Vec<TvRecord>> {
        Ok(self.document().await?.tvs)
    }

    pub async fn get_tv(&self, tv_id: &str) -> Result<TvRecord> {
        self.document().await?
            .get_tv(tv_id)
            .cloned()
            .ok_or_else(|| LibraryError::not_found(format!("tv '{tv_id}'")))
    }

    pub async fn add_tv(&self, new_tv: NewTv) -> Result<(TvRecord, ChangeSet)> {
        let name = required("name", &new_tv.name)?;
        let ip = address(&new_tv.ip)?;
        let tags = normalize_tags(&new_tv.tags);
        let tv = self.store().mutate(|doc| {
            let now = Utc::now();
            doc.ensure_tags(&tags);
            let tv = TvRecord {
                id: next_tv_id(&doc.tvs, now.timestamp_millis()),
                name,
                ip,
                added: now,
                tags: tags.into_iter().collect(),
                extra: Default::default(),
            };
            doc.tvs.push(tv.clone());
            Ok(tv)
        }).await?;
        info!("added tv {} ({})", tv.id, tv.name);
        let changes = self.metadata_change(format!("added tv {}", tv.name));
        Ok((tv, changes))
    }

    pub async fn update_tv(&self, tv_id: &str, update: TvUpdate) -> Result<(TvRecord, ChangeSet)> {
        let name = update.name.as_deref().map(|x| required("name", x)).transpose()?;
        let ip = update.ip.as_deref().map(address).transpose()?;
        let tv = self.store().mutate(|doc| {
            let tv = doc.get_tv_mut(tv_id).ok_or_else(|| LibraryError::not_found(format!("tv '{tv_id}'")))?;
            if let Some(name) = name {
                tv.name = name;
            }
            if let Some(ip) = ip {
                tv.ip = ip;
            }
            Ok(tv.clone())
        }).await?;
        Ok((tv, self.metadata_change(format!("updated tv {tv_id}"))))
    }

    /// Replaces the TV's tags; new names join the vocabulary. An empty set
    /// makes the TV show every image.
    pub async fn set_tv_tags(&self, tv_id: &str, tags: &[String]) -> Result<(TvRecord, ChangeSet)> {
        let tags = normalize_tags(tags);
        let tv = self.store().mutate(|doc| {
            if doc.get_tv(tv_id).is_none() {
                return Err(LibraryError::not_found(format!("tv '{tv_id}'")));
            }
            doc.ensure_tags(&tags);
            let tv = doc.get_tv_mut(tv_id).ok_or_else(|| LibraryError::not_found(format!("tv '{tv_id}'")))?;
            tv.tags = tags.into_iter().collect::<BTreeSet<Tag>>();
            Ok(tv.clone())
        }).await?;
        info!("tv {} now shows {:?}", tv.id, tv.tags);
        Ok((tv, self.metadata_change(format!("retagged tv {tv_id}"))))
    }

    pub async fn delete_tv(&self, tv_id: &str) -> Result<ChangeSet> {
        let removed = self.store().mutate(|doc| {
            let index = doc.tvs.iter().position(|tv| tv.id == tv_id)
                .ok_or_else(|| LibraryError::not_found(format!("tv '{tv_id}'")))?;
            Ok(doc.tvs.remove(index))
        }).await?;
        info!("deleted tv {} ({})", removed.id, removed.name);
        Ok(self.metadata_change(format!("deleted tv {}", removed.name)))
    }

    /// Images the TV would display.
    pub async fn tv_images(&self, tv_id: &str) -> Result<Vec<ImageRecord>> {
        let doc = self.document().await?;
        let tv = doc.get_tv(tv_id).ok_or_else(|| LibraryError::not_found(format!("tv '{tv_id}'")))?;
        Ok(images_for_tv(&doc, tv).into_iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use crate::library::tests::{library_in, upload};
    use super::*;

    fn new_tv(name: &str, tags: &[&str]) -> NewTv {
        NewTv { name: name.to_string(), ip: "192.168.1.20".to_string(), tags: tags.iter().map(|x| x.to_string()).collect() }
    }

    #[test]
    fn ids_are_disambiguated_within_a_millisecond() {
        let mut tvs = Vec::new();
        for _ in 0..3 {
            let id = next_tv_id(&tvs, 1_700_000_000_000);
            tvs.push(TvRecord { id, name: String::new(), ip: String::new(), added: Utc::now(), tags: BTreeSet::new(), extra: Default::default() });
        }
        let ids = tvs.iter().map(|x| x.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["tv-1700000000000", "tv-1700000000000-1", "tv-1700000000000-2"]);
    }

    #[tokio::test]
    async fn tv_lifecycle() {
        let dir = TempDir::new().unwrap();
        let library = library_in(dir.path());
        let (tv, _) = library.add_tv(new_tv(" Living room ", &["Nature"])).await.unwrap();
        assert!(tv.id.starts_with("tv-"));
        assert_eq!(tv.name, "Living room");
        assert!(library.list_tags().await.unwrap().contains(&"nature".to_string()));

        let update = TvUpdate { name: Some("Lounge".to_string()), ip: None };
        let (updated, _) = library.update_tv(&tv.id, update).await.unwrap();
        assert_eq!(updated.name, "Lounge");
        assert_eq!(updated.ip, tv.ip);
        assert_eq!(updated.added, tv.added);

        let (retagged, _) = library.set_tv_tags(&tv.id, &["sunset".to_string()]).await.unwrap();
        assert_eq!(retagged.tags, BTreeSet::from(["sunset".to_string()]));
        assert!(library.list_tags().await.unwrap().contains(&"sunset".to_string()));

        library.delete_tv(&tv.id).await.unwrap();
        assert!(library.list_tvs().await.unwrap().is_empty());
        assert!(matches!(library.get_tv(&tv.id).await, Err(LibraryError::NotFound(_))));
    }

    #[tokio::test]
    async fn invalid_tvs_are_rejected() {
        let dir = TempDir::new().unwrap();
        let library = library_in(dir.path());
        assert!(matches!(library.add_tv(new_tv("  ", &[])).await, Err(LibraryError::InvalidInput(_))));
        let bad_ip = NewTv { ip: "10.0.0.1 10.0.0.2".to_string(), ..new_tv("x", &[]) };
        assert!(matches!(library.add_tv(bad_ip).await, Err(LibraryError::InvalidInput(_))));
        assert!(matches!(library.set_tv_tags("tv-0", &[]).await, Err(LibraryError::NotFound(_))));
    }

    #[tokio::test]
    async fn tv_images_follow_tags() {
        let dir = TempDir::new().unwrap();
        let library = library_in(dir.path());
        let nature = upload(&library, "forest", &["nature"]).await;
        upload(&library, "skyline", &["city"]).await;
        let (tv, _) = library.add_tv(new_tv("Bedroom", &["nature", "sunset"])).await.unwrap();
        let images = library.tv_images(&tv.id).await.unwrap();
        assert_eq!(images.into_iter().map(|x| x.filename).collect::<Vec<_>>(), vec![nature.filename]);

        let (everything, _) = library.set_tv_tags(&tv.id, &[]).await.unwrap();
        assert_eq!(library.tv_images(&everything.id).await.unwrap().len(), 2);
    }
}
