//! Dimension resolution
//!
//! Find-or-create for the normalized reference entities fact rows point
//! at. A resolver is scoped to one normalization run: it loads a snapshot
//! of each dimension table once, serves case-insensitive lookups from
//! memory, and appends newly created rows to the snapshot so later items
//! in the same run reuse them. Row creation is backed by the NOCASE
//! unique indexes, so concurrent runs converge on the same row via
//! insert-or-fetch.

mod titles;

pub use titles::{TitleInput, TitleType};

use cush_common::Result;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

pub(crate) use titles::{ItemRow, TitleRow};

/// Truncation limits applied to incoming free text
#[derive(Debug, Clone, Copy)]
pub struct TextLimits {
    /// Limit for short dimension names
    pub short: usize,
    /// Limit for titles and identifiers
    pub long: usize,
}

impl Default for TextLimits {
    fn default() -> Self {
        Self {
            short: 191,
            long: 512,
        }
    }
}

/// Clean vendor free text before matching or storing
///
/// Control characters are stripped, surrounding whitespace trimmed, and
/// the result truncated at a character boundary.
pub fn sanitize(input: &str, max_chars: usize) -> String {
    let cleaned: String = input.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();
    if trimmed.chars().count() > max_chars {
        trimmed.chars().take(max_chars).collect()
    } else {
        trimmed.to_string()
    }
}

/// In-run snapshot of one name-keyed dimension table
struct NameCache {
    table: &'static str,
    rows: Vec<(String, String)>, // (guid, name)
}

impl NameCache {
    async fn load(pool: &SqlitePool, table: &'static str) -> Result<Self> {
        let query = format!("SELECT guid, name FROM {table}");
        let rows = sqlx::query(&query)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| (row.get("guid"), row.get("name")))
            .collect();
        Ok(Self { table, rows })
    }

    fn find(&self, name: &str) -> Option<String> {
        self.rows
            .iter()
            .find(|(_, existing)| existing.eq_ignore_ascii_case(name))
            .map(|(guid, _)| guid.clone())
    }

    /// Case-insensitive find, creating the row on miss
    async fn find_or_create(&mut self, pool: &SqlitePool, name: &str) -> Result<String> {
        if let Some(guid) = self.find(name) {
            return Ok(guid);
        }

        // The NOCASE unique index makes this safe under concurrent runs:
        // whoever loses the insert race fetches the winner's row
        let insert = format!("INSERT OR IGNORE INTO {} (guid, name) VALUES (?, ?)", self.table);
        sqlx::query(&insert)
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .execute(pool)
            .await?;

        let select = format!(
            "SELECT guid FROM {} WHERE name = ? COLLATE NOCASE",
            self.table
        );
        let guid: String = sqlx::query_scalar(&select).bind(name).fetch_one(pool).await?;

        debug!(table = self.table, name, "dimension row resolved");
        self.rows.push((guid.clone(), name.to_string()));
        Ok(guid)
    }
}

/// Run-scoped dimension resolver
pub struct DimensionResolver {
    pool: SqlitePool,
    limits: TextLimits,
    platforms: NameCache,
    publishers: NameCache,
    access_types: NameCache,
    access_methods: NameCache,
    data_types: NameCache,
    section_types: NameCache,
    databases: NameCache,
    pub(crate) titles: Vec<TitleRow>,
    pub(crate) items: Vec<ItemRow>,
}

impl DimensionResolver {
    /// Snapshot every dimension table for one normalization run
    pub async fn load(pool: &SqlitePool, limits: TextLimits) -> Result<Self> {
        Ok(Self {
            platforms: NameCache::load(pool, "platforms").await?,
            publishers: NameCache::load(pool, "publishers").await?,
            access_types: NameCache::load(pool, "access_types").await?,
            access_methods: NameCache::load(pool, "access_methods").await?,
            data_types: NameCache::load(pool, "data_types").await?,
            section_types: NameCache::load(pool, "section_types").await?,
            databases: NameCache::load(pool, "databases").await?,
            titles: titles::load_titles(pool).await?,
            items: titles::load_items(pool).await?,
            pool: pool.clone(),
            limits,
        })
    }

    pub fn limits(&self) -> TextLimits {
        self.limits
    }

    pub(crate) fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub async fn platform_id(&mut self, name: &str) -> Result<Option<String>> {
        let name = sanitize(name, self.limits.short);
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.platforms.find_or_create(&self.pool, &name).await?))
    }

    pub async fn publisher_id(&mut self, name: &str) -> Result<Option<String>> {
        let name = sanitize(name, self.limits.short);
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.publishers.find_or_create(&self.pool, &name).await?))
    }

    pub async fn access_type_id(&mut self, name: &str) -> Result<Option<String>> {
        let name = sanitize(name, self.limits.short);
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.access_types.find_or_create(&self.pool, &name).await?))
    }

    pub async fn access_method_id(&mut self, name: &str) -> Result<Option<String>> {
        let name = sanitize(name, self.limits.short);
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.access_methods.find_or_create(&self.pool, &name).await?))
    }

    pub async fn data_type_id(&mut self, name: &str) -> Result<Option<String>> {
        let name = sanitize(name, self.limits.short);
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.data_types.find_or_create(&self.pool, &name).await?))
    }

    pub async fn section_type_id(&mut self, name: &str) -> Result<Option<String>> {
        let name = sanitize(name, self.limits.short);
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.section_types.find_or_create(&self.pool, &name).await?))
    }

    pub async fn database_id(&mut self, name: &str) -> Result<Option<String>> {
        let name = sanitize(name, self.limits.short);
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.databases.find_or_create(&self.pool, &name).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cush_common::db::create_all_tables;

    async fn test_resolver() -> DimensionResolver {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_all_tables(&pool).await.unwrap();
        DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_sanitize_strips_and_truncates() {
        assert_eq!(sanitize("  JSTOR \n", 191), "JSTOR");
        assert_eq!(sanitize("a\u{0007}b", 191), "ab");
        assert_eq!(sanitize("abcdef", 4), "abcd");
        // truncation respects character boundaries
        assert_eq!(sanitize("ééééé", 3), "ééé");
        assert_eq!(sanitize("   ", 191), "");
    }

    #[tokio::test]
    async fn test_case_insensitive_idempotence() {
        let mut resolver = test_resolver().await;

        let first = resolver.platform_id("JSTOR").await.unwrap().unwrap();
        let second = resolver.platform_id("jstor").await.unwrap().unwrap();
        let third = resolver.platform_id("  JStor ").await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_empty_name_resolves_to_none() {
        let mut resolver = test_resolver().await;
        assert!(resolver.publisher_id("").await.unwrap().is_none());
        assert!(resolver.publisher_id("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_created_row_visible_to_fresh_resolver() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_all_tables(&pool).await.unwrap();

        let mut run1 = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();
        let created = run1.data_type_id("Journal").await.unwrap().unwrap();

        let mut run2 = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();
        let found = run2.data_type_id("JOURNAL").await.unwrap().unwrap();
        assert_eq!(created, found);
    }

    #[tokio::test]
    async fn test_distinct_dimensions_do_not_collide() {
        let mut resolver = test_resolver().await;
        let platform = resolver.platform_id("Wiley").await.unwrap().unwrap();
        let publisher = resolver.publisher_id("Wiley").await.unwrap().unwrap();
        assert_ne!(platform, publisher);
    }
}
