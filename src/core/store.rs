use log::{error, info};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::core::error::Result;
use crate::core::state::StoryMeta;

/// Listing filter. `published: Some(b)` keeps only records whose
/// publication flag equals `b`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilter {
    pub published: Option<bool>,
}

impl ListFilter {
    pub fn published_only() -> Self {
        Self {
            published: Some(true),
        }
    }
}

/// Story metadata keyed by id, fully held in memory and rewritten to a
/// single JSON file on every mutation.
///
/// Each operation is serialised by the inner lock, but a caller doing
/// get-then-`add_or_replace` still gets last-writer-wins semantics. Use
/// [`StoryStore::update`] to mutate a record in place.
pub struct StoryStore {
    path: PathBuf,
    stories: RwLock<BTreeMap<String, StoryMeta>>,
}

impl StoryStore {
    /// Loads the backing file. A missing file starts empty; an unreadable
    /// one is moved aside to `<file>.corrupt` and the store starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stories = Self::load(&path).await;
        Self {
            path,
            stories: RwLock::new(stories),
        }
    }

    async fn load(path: &Path) -> BTreeMap<String, StoryMeta> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No stories database found at {}, starting fresh.", path.display());
                return BTreeMap::new();
            }
            Err(e) => {
                error!("Failed to read stories from {}: {}", path.display(), e);
                return BTreeMap::new();
            }
        };

        match serde_json::from_slice::<BTreeMap<String, StoryMeta>>(&bytes) {
            Ok(stories) => {
                info!("Loaded {} stories from {}", stories.len(), path.display());
                stories
            }
            Err(e) => {
                error!("Failed to parse stories from {}: {}", path.display(), e);
                let quarantine = path.with_extension("json.corrupt");
                if let Err(e) = tokio::fs::rename(path, &quarantine).await {
                    error!("Failed to move corrupt store aside: {}", e);
                }
                BTreeMap::new()
            }
        }
    }

    async fn save(&self, stories: &BTreeMap<String, StoryMeta>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_vec_pretty(stories)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Inserts or overwrites a record. On a failed write the previous
    /// in-memory state is restored.
    pub async fn add_or_replace(&self, story: StoryMeta) -> Result<()> {
        let mut stories = self.stories.write().await;
        let story_id = story.id.clone();
        let previous = stories.insert(story_id.clone(), story);
        if let Err(e) = self.save(&stories).await {
            match previous {
                Some(previous) => stories.insert(story_id, previous),
                None => stories.remove(&story_id),
            };
            return Err(e);
        }
        Ok(())
    }

    pub async fn get(&self, story_id: &str) -> Option<StoryMeta> {
        self.stories.read().await.get(story_id).cloned()
    }

    pub async fn contains(&self, story_id: &str) -> bool {
        self.stories.read().await.contains_key(story_id)
    }

    /// All matching records, newest first.
    pub async fn list(&self, filter: ListFilter) -> Vec<StoryMeta> {
        let stories = self.stories.read().await;
        let mut out: Vec<StoryMeta> = stories
            .values()
            .filter(|s| filter.published.map_or(true, |p| s.is_on_spotify == p))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Read-modify-write of one record. Returns `false` if `story_id` is absent.
    pub async fn update<F>(&self, story_id: &str, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut StoryMeta),
    {
        let mut stories = self.stories.write().await;
        let Some(story) = stories.get_mut(story_id) else {
            return Ok(false);
        };
        let previous = story.clone();
        mutate(story);
        if let Err(e) = self.save(&stories).await {
            stories.insert(story_id.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    pub async fn set_publication_flag(&self, story_id: &str, enabled: bool) -> Result<bool> {
        self.update(story_id, |story| story.is_on_spotify = enabled).await
    }

    pub async fn delete(&self, story_id: &str) -> Result<bool> {
        let mut stories = self.stories.write().await;
        let Some(previous) = stories.remove(story_id) else {
            return Ok(false);
        };
        if let Err(e) = self.save(&stories).await {
            stories.insert(story_id.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{GenerationParams, StoryStatus};
    use chrono::{Duration, Utc};

    fn story(id: &str, age_minutes: i64, published: bool) -> StoryMeta {
        let params = GenerationParams::new(format!("idea {}", id));
        let mut meta = StoryMeta::generating(id, &params, "aria", "Aria");
        meta.created_at = Utc::now() - Duration::minutes(age_minutes);
        meta.is_on_spotify = published;
        meta
    }

    #[tokio::test]
    async fn test_round_trip_and_delete() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = StoryStore::open(temp_dir.path().join("stories.json")).await;

        let record = story("aaaa1111", 0, false);
        store.add_or_replace(record.clone()).await?;
        assert_eq!(store.get("aaaa1111").await, Some(record));

        assert!(store.delete("aaaa1111").await?);
        assert_eq!(store.get("aaaa1111").await, None);
        assert!(!store.delete("aaaa1111").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_persists_across_reopen() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("stories.json");

        let mut record = story("bbbb2222", 0, true);
        record.mark_done(120.25, 2, 300, "Done");
        {
            let store = StoryStore::open(&path).await;
            store.add_or_replace(record.clone()).await?;
        }

        let reopened = StoryStore::open(&path).await;
        let loaded = reopened.get("bbbb2222").await.expect("record persisted");
        assert_eq!(loaded, record);
        assert_eq!(loaded.status, StoryStatus::Done);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_sorted_newest_first_for_any_insert_order() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = StoryStore::open(temp_dir.path().join("stories.json")).await;

        for (id, age) in [("mid", 10), ("new", 1), ("old", 100), ("older", 200)] {
            store.add_or_replace(story(id, age, false)).await?;
        }

        let ids: Vec<String> = store
            .list(ListFilter::default())
            .await
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old", "older"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_publication_filter() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = StoryStore::open(temp_dir.path().join("stories.json")).await;

        store.add_or_replace(story("p1", 1, true)).await?;
        store.add_or_replace(story("u1", 2, false)).await?;
        store.add_or_replace(story("p2", 3, true)).await?;

        let published: Vec<String> = store
            .list(ListFilter::published_only())
            .await
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(published, vec!["p1", "p2"]);

        let unpublished = store.list(ListFilter { published: Some(false) }).await;
        assert_eq!(unpublished.len(), 1);
        assert_eq!(unpublished[0].id, "u1");
        Ok(())
    }

    #[tokio::test]
    async fn test_set_publication_flag() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = StoryStore::open(temp_dir.path().join("stories.json")).await;
        store.add_or_replace(story("cccc3333", 0, false)).await?;

        assert!(store.set_publication_flag("cccc3333", true).await?);
        assert!(store.get("cccc3333").await.unwrap().is_on_spotify);
        assert!(!store.set_publication_flag("missing", true).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("stories.json");
        let store = StoryStore::open(&path).await;
        let record = story("eeee5555", 0, false);
        store.add_or_replace(record.clone()).await?;

        // A directory in place of the file makes every save fail.
        std::fs::remove_file(&path)?;
        std::fs::create_dir(&path)?;

        assert!(store.set_publication_flag("eeee5555", true).await.is_err());
        assert_eq!(store.get("eeee5555").await, Some(record.clone()));

        assert!(store.add_or_replace(story("ffff6666", 0, false)).await.is_err());
        assert!(!store.contains("ffff6666").await);

        let mut replaced = record.clone();
        replaced.title = "Renamed".to_string();
        assert!(store.add_or_replace(replaced).await.is_err());
        assert_eq!(store.get("eeee5555").await, Some(record));

        assert!(store.delete("eeee5555").await.is_err());
        assert!(store.contains("eeee5555").await);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("stories.json");
        std::fs::write(&path, b"{ not json")?;

        let store = StoryStore::open(&path).await;
        assert!(store.list(ListFilter::default()).await.is_empty());
        assert!(temp_dir.path().join("stories.json.corrupt").exists());

        store.add_or_replace(story("dddd4444", 0, false)).await?;
        let reopened = StoryStore::open(&path).await;
        assert!(reopened.contains("dddd4444").await);
        Ok(())
    }
}
