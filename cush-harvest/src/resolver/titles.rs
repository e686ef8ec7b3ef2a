//! Title and item resolution
//!
//! Titles are matched by type, case-insensitive name and identifying
//! code (ISBN for books, ISSN/eISSN/ISBN otherwise). A match widens the
//! stored `article_version`/`pub_date` when the incoming value is longer
//! but never narrows them. Item-report parents resolve their title
//! first, then a parent "item" envelope keyed by (title, parent data
//! type) which child items reference.

use cush_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::report::ItemIdentifiers;

use super::{sanitize, DimensionResolver};

/// How a title participates in identifier matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleType {
    Book,
    Journal,
    Item,
    Unknown,
}

impl TitleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Book => "Book",
            Self::Journal => "Journal",
            Self::Item => "Item",
            Self::Unknown => "Unknown",
        }
    }

    /// Derive the title type from a COUNTER `Data_Type` value
    pub fn from_data_type(data_type: Option<&str>) -> Self {
        match data_type {
            Some("Book") => Self::Book,
            Some("Journal") => Self::Journal,
            Some(_) => Self::Unknown,
            None => Self::Unknown,
        }
    }
}

/// Incoming title attributes from one report item
#[derive(Debug, Clone, Default)]
pub struct TitleInput {
    pub title: String,
    pub title_type: Option<TitleType>,
    pub ids: ItemIdentifiers,
    pub article_version: Option<String>,
    pub pub_date: Option<String>,
}

impl TitleInput {
    fn resolved_type(&self) -> TitleType {
        self.title_type.unwrap_or(TitleType::Unknown)
    }
}

/// Snapshot row of the titles table
#[derive(Debug, Clone)]
pub(crate) struct TitleRow {
    pub guid: String,
    pub title: String,
    pub title_type: String,
    pub issn: Option<String>,
    pub eissn: Option<String>,
    pub isbn: Option<String>,
    pub article_version: Option<String>,
    pub pub_date: Option<String>,
}

impl TitleRow {
    /// Code that identifies this title within its type
    fn identifying_code(&self, title_type: TitleType) -> Option<&str> {
        match title_type {
            TitleType::Book => self.isbn.as_deref(),
            _ => self
                .issn
                .as_deref()
                .or(self.eissn.as_deref())
                .or(self.isbn.as_deref()),
        }
    }
}

/// Snapshot row of the items table
#[derive(Debug, Clone)]
pub(crate) struct ItemRow {
    pub guid: String,
    pub title_id: String,
    pub parent_item_id: Option<String>,
    pub data_type_id: Option<String>,
}

pub(crate) async fn load_titles(pool: &SqlitePool) -> Result<Vec<TitleRow>> {
    let rows = sqlx::query(
        "SELECT guid, title, title_type, issn, eissn, isbn, article_version, pub_date FROM titles",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TitleRow {
            guid: row.get("guid"),
            title: row.get("title"),
            title_type: row.get("title_type"),
            issn: row.get("issn"),
            eissn: row.get("eissn"),
            isbn: row.get("isbn"),
            article_version: row.get("article_version"),
            pub_date: row.get("pub_date"),
        })
        .collect())
}

pub(crate) async fn load_items(pool: &SqlitePool) -> Result<Vec<ItemRow>> {
    let rows = sqlx::query("SELECT guid, title_id, parent_item_id, data_type_id FROM items")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| ItemRow {
            guid: row.get("guid"),
            title_id: row.get("title_id"),
            parent_item_id: row.get("parent_item_id"),
            data_type_id: row.get("data_type_id"),
        })
        .collect())
}

fn code_of(ids: &ItemIdentifiers, title_type: TitleType) -> Option<String> {
    match title_type {
        TitleType::Book => ids.isbn.clone(),
        _ => ids
            .issn
            .clone()
            .or_else(|| ids.eissn.clone())
            .or_else(|| ids.isbn.clone()),
    }
}

fn codes_match(incoming: Option<&str>, stored: Option<&str>) -> bool {
    match (incoming, stored) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    }
}

/// Widening rule: take the new value only when it is longer
fn widened(stored: &Option<String>, incoming: &Option<String>) -> Option<String> {
    match (stored, incoming) {
        (Some(stored), Some(incoming)) if incoming.len() > stored.len() => {
            Some(incoming.clone())
        }
        (None, Some(incoming)) => Some(incoming.clone()),
        (stored, _) => stored.clone(),
    }
}

impl DimensionResolver {
    /// Find-or-create a title row
    ///
    /// Returns None when the item carries no identifying key at all (no
    /// title text and no usable identifier); such items are skipped by
    /// the normalizers.
    pub async fn title_id(&mut self, input: &TitleInput) -> Result<Option<String>> {
        let limits = self.limits();
        let title = sanitize(&input.title, limits.long);
        let title_type = input.resolved_type();

        let ids = ItemIdentifiers {
            issn: clean_opt(&input.ids.issn, limits.long),
            eissn: clean_opt(&input.ids.eissn, limits.long),
            isbn: clean_opt(&input.ids.isbn, limits.long),
            doi: clean_opt(&input.ids.doi, limits.long),
            proprietary: clean_opt(&input.ids.proprietary, limits.long),
            uri: clean_opt(&input.ids.uri, limits.long),
        };
        let code = code_of(&ids, title_type);

        if title.is_empty() && ids.is_empty() {
            return Ok(None);
        }

        let article_version = clean_opt(&input.article_version, limits.short);
        let pub_date = clean_opt(&input.pub_date, limits.short);

        if let Some(index) = self.titles.iter().position(|row| {
            row.title_type == title_type.as_str()
                && row.title.eq_ignore_ascii_case(&title)
                && codes_match(code.as_deref(), row.identifying_code(title_type))
        }) {
            let guid = self.titles[index].guid.clone();
            let wider_version = widened(&self.titles[index].article_version, &article_version);
            let wider_date = widened(&self.titles[index].pub_date, &pub_date);

            if wider_version != self.titles[index].article_version
                || wider_date != self.titles[index].pub_date
            {
                sqlx::query(
                    "UPDATE titles SET article_version = ?, pub_date = ?,
                     updated_at = CURRENT_TIMESTAMP WHERE guid = ?",
                )
                .bind(&wider_version)
                .bind(&wider_date)
                .bind(&guid)
                .execute(&self.pool())
                .await?;

                self.titles[index].article_version = wider_version;
                self.titles[index].pub_date = wider_date;
            }

            return Ok(Some(guid));
        }

        let guid = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO titles (guid, title, title_type, issn, eissn, isbn, doi,
                                proprietary_id, uri, article_version, pub_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&guid)
        .bind(&title)
        .bind(title_type.as_str())
        .bind(&ids.issn)
        .bind(&ids.eissn)
        .bind(&ids.isbn)
        .bind(&ids.doi)
        .bind(&ids.proprietary)
        .bind(&ids.uri)
        .bind(&article_version)
        .bind(&pub_date)
        .execute(&self.pool())
        .await?;

        self.titles.push(TitleRow {
            guid: guid.clone(),
            title,
            title_type: title_type.as_str().to_string(),
            issn: ids.issn,
            eissn: ids.eissn,
            isbn: ids.isbn,
            article_version,
            pub_date,
        });

        Ok(Some(guid))
    }

    /// Find-or-create the parent "item" envelope for an item-report child
    pub async fn parent_item_id(
        &mut self,
        title_id: &str,
        data_type_id: Option<&str>,
    ) -> Result<String> {
        self.find_or_create_item(title_id, None, data_type_id).await
    }

    /// Find-or-create an item row, optionally under a parent envelope
    pub async fn item_id(
        &mut self,
        title_id: &str,
        parent_item_id: Option<&str>,
        data_type_id: Option<&str>,
    ) -> Result<String> {
        self.find_or_create_item(title_id, parent_item_id, data_type_id)
            .await
    }

    async fn find_or_create_item(
        &mut self,
        title_id: &str,
        parent_item_id: Option<&str>,
        data_type_id: Option<&str>,
    ) -> Result<String> {
        if let Some(row) = self.items.iter().find(|row| {
            row.title_id == title_id
                && row.parent_item_id.as_deref() == parent_item_id
                && row.data_type_id.as_deref() == data_type_id
        }) {
            return Ok(row.guid.clone());
        }

        let guid = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO items (guid, title_id, parent_item_id, data_type_id) VALUES (?, ?, ?, ?)",
        )
        .bind(&guid)
        .bind(title_id)
        .bind(parent_item_id)
        .bind(data_type_id)
        .execute(&self.pool())
        .await?;

        self.items.push(ItemRow {
            guid: guid.clone(),
            title_id: title_id.to_string(),
            parent_item_id: parent_item_id.map(String::from),
            data_type_id: data_type_id.map(String::from),
        });

        Ok(guid)
    }
}

fn clean_opt(value: &Option<String>, max_chars: usize) -> Option<String> {
    value.as_deref().map(|v| sanitize(v, max_chars)).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TextLimits;
    use cush_common::db::create_all_tables;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_all_tables(&pool).await.unwrap();
        pool
    }

    fn journal(title: &str, issn: Option<&str>) -> TitleInput {
        TitleInput {
            title: title.to_string(),
            title_type: Some(TitleType::Journal),
            ids: ItemIdentifiers {
                issn: issn.map(String::from),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_title_matched_case_insensitively_with_code() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        let first = resolver
            .title_id(&journal("Nature", Some("0028-0836")))
            .await
            .unwrap()
            .unwrap();
        let second = resolver
            .title_id(&journal("NATURE", Some("0028-0836")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_different_code_means_different_title() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        let print = resolver
            .title_id(&journal("Nature", Some("0028-0836")))
            .await
            .unwrap()
            .unwrap();
        let rebranded = resolver
            .title_id(&journal("Nature", Some("9999-0000")))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(print, rebranded);
    }

    #[tokio::test]
    async fn test_single_row_across_two_runs() {
        let pool = test_pool().await;

        let mut run1 = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();
        run1.title_id(&journal("Nature", Some("0028-0836")))
            .await
            .unwrap();

        let mut run2 = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();
        run2.title_id(&journal("nature", Some("0028-0836")))
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM titles")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_book_keyed_by_isbn() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        let input = TitleInput {
            title: "Gravitation".to_string(),
            title_type: Some(TitleType::Book),
            ids: ItemIdentifiers {
                isbn: Some("978-0-7167-0344-0".to_string()),
                // ISSN is not an identifying code for books
                issn: Some("0000-0000".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let first = resolver.title_id(&input).await.unwrap().unwrap();

        let mut same_isbn = input.clone();
        same_isbn.ids.issn = None;
        let second = resolver.title_id(&same_isbn).await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_pub_date_widens_but_never_narrows() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        let mut input = journal("Nature", Some("0028-0836"));
        input.pub_date = Some("2024".to_string());
        let guid = resolver.title_id(&input).await.unwrap().unwrap();

        input.pub_date = Some("2024-03-15".to_string());
        resolver.title_id(&input).await.unwrap();

        let stored: Option<String> =
            sqlx::query_scalar("SELECT pub_date FROM titles WHERE guid = ?")
                .bind(&guid)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored.as_deref(), Some("2024-03-15"));

        // A shorter value arriving later does not narrow the stored one
        input.pub_date = Some("2024".to_string());
        resolver.title_id(&input).await.unwrap();
        let stored: Option<String> =
            sqlx::query_scalar("SELECT pub_date FROM titles WHERE guid = ?")
                .bind(&guid)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored.as_deref(), Some("2024-03-15"));
    }

    #[tokio::test]
    async fn test_no_identifying_key_is_skipped() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        let input = TitleInput {
            title: "   ".to_string(),
            title_type: Some(TitleType::Journal),
            ..Default::default()
        };
        assert!(resolver.title_id(&input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_parent_envelope_reused() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        let title = resolver
            .title_id(&journal("Nature", Some("0028-0836")))
            .await
            .unwrap()
            .unwrap();
        let data_type = resolver.data_type_id("Journal").await.unwrap().unwrap();

        let parent1 = resolver
            .parent_item_id(&title, Some(&data_type))
            .await
            .unwrap();
        let parent2 = resolver
            .parent_item_id(&title, Some(&data_type))
            .await
            .unwrap();
        assert_eq!(parent1, parent2);

        let child = resolver
            .item_id(&title, Some(&parent1), Some(&data_type))
            .await
            .unwrap();
        assert_ne!(child, parent1);
    }
}
