//! Provider capability queries

use std::str::FromStr;

use cush_common::db::models::{Connector, Release};
use cush_common::Result;
use sqlx::SqlitePool;
use tracing::warn;

/// Connector query parameters the provider declares as required
///
/// The set is provider configuration, not a fixed list; unknown rows are
/// skipped with a warning so one bad admin entry cannot break harvesting.
pub async fn required_connectors(pool: &SqlitePool, provider_id: &str) -> Result<Vec<Connector>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT connector FROM provider_connectors WHERE provider_id = ? ORDER BY connector",
    )
    .bind(provider_id)
    .fetch_all(pool)
    .await?;

    let mut connectors = Vec::with_capacity(rows.len());
    for row in rows {
        match Connector::from_str(&row) {
            Ok(connector) => connectors.push(connector),
            Err(_) => warn!(provider_id, connector = %row, "ignoring unknown connector"),
        }
    }
    Ok(connectors)
}

/// Whether the provider's registry lists a COUNTER release
pub async fn provider_has_release(
    pool: &SqlitePool,
    provider_id: &str,
    release: Release,
) -> Result<bool> {
    let found: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM provider_releases WHERE provider_id = ? AND release = ?)",
    )
    .bind(provider_id)
    .bind(release.as_str())
    .fetch_one(pool)
    .await?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cush_common::db::create_all_tables;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_all_tables(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO providers (guid, name, server_url)
             VALUES ('prov-1', 'Test Press', 'https://sushi.example.com')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_required_connectors() {
        let pool = test_pool().await;
        for connector in ["customer_id", "api_key"] {
            sqlx::query("INSERT INTO provider_connectors (provider_id, connector) VALUES ('prov-1', ?)")
                .bind(connector)
                .execute(&pool)
                .await
                .unwrap();
        }

        let connectors = required_connectors(&pool, "prov-1").await.unwrap();
        assert_eq!(connectors, vec![Connector::ApiKey, Connector::CustomerId]);
    }

    #[tokio::test]
    async fn test_provider_release_registry() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO provider_releases (provider_id, release) VALUES ('prov-1', '5')")
            .execute(&pool)
            .await
            .unwrap();

        assert!(provider_has_release(&pool, "prov-1", Release::R5).await.unwrap());
        assert!(!provider_has_release(&pool, "prov-1", Release::R5_1).await.unwrap());
    }
}
