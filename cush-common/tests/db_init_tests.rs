//! Schema initialization integration tests

use cush_common::db::create_all_tables;
use sqlx::SqlitePool;

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    create_all_tables(&pool)
        .await
        .expect("Schema initialization failed");
    pool
}

async fn seed_pairing(pool: &SqlitePool) {
    sqlx::query("INSERT INTO institutions (guid, name) VALUES ('inst-1', 'Test University')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO providers (guid, name, server_url)
         VALUES ('prov-1', 'Test Press', 'https://sushi.example.com/r5')",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO credentials (guid, institution_id, provider_id)
         VALUES ('cred-1', 'inst-1', 'prov-1')",
    )
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_create_all_tables_is_idempotent() {
    let pool = memory_pool().await;
    create_all_tables(&pool)
        .await
        .expect("Second initialization should be a no-op");
}

#[tokio::test]
async fn test_credential_pairing_is_unique() {
    let pool = memory_pool().await;
    seed_pairing(&pool).await;

    let dup = sqlx::query(
        "INSERT INTO credentials (guid, institution_id, provider_id)
         VALUES ('cred-2', 'inst-1', 'prov-1')",
    )
    .execute(&pool)
    .await;
    assert!(dup.is_err(), "Second credential for the same pairing must fail");
}

#[tokio::test]
async fn test_harvest_unique_per_credential_report_yearmon() {
    let pool = memory_pool().await;
    seed_pairing(&pool).await;

    sqlx::query(
        "INSERT INTO harvests (guid, credential_id, report, yearmon)
         VALUES ('h-1', 'cred-1', 'TR', '2024-03')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let dup = sqlx::query(
        "INSERT INTO harvests (guid, credential_id, report, yearmon)
         VALUES ('h-2', 'cred-1', 'TR', '2024-03')",
    )
    .execute(&pool)
    .await;
    assert!(dup.is_err());

    // A different month is fine
    sqlx::query(
        "INSERT INTO harvests (guid, credential_id, report, yearmon)
         VALUES ('h-3', 'cred-1', 'TR', '2024-04')",
    )
    .execute(&pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_queue_entry_unique_per_harvest() {
    let pool = memory_pool().await;
    seed_pairing(&pool).await;
    sqlx::query(
        "INSERT INTO harvests (guid, credential_id, report, yearmon)
         VALUES ('h-1', 'cred-1', 'TR', '2024-03')",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("INSERT INTO harvest_queue (guid, harvest_id) VALUES ('q-1', 'h-1')")
        .execute(&pool)
        .await
        .unwrap();

    // INSERT OR IGNORE leaves the original row in place
    sqlx::query("INSERT OR IGNORE INTO harvest_queue (guid, harvest_id) VALUES ('q-2', 'h-1')")
        .execute(&pool)
        .await
        .unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM harvest_queue")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_dimension_names_unique_case_insensitively() {
    let pool = memory_pool().await;

    sqlx::query("INSERT INTO platforms (guid, name) VALUES ('p-1', 'JSTOR')")
        .execute(&pool)
        .await
        .unwrap();

    let dup = sqlx::query("INSERT INTO platforms (guid, name) VALUES ('p-2', 'jstor')")
        .execute(&pool)
        .await;
    assert!(dup.is_err(), "NOCASE index must reject a case variant");
}

#[tokio::test]
async fn test_deleting_harvest_cascades() {
    let pool = memory_pool().await;
    seed_pairing(&pool).await;
    sqlx::query(
        "INSERT INTO harvests (guid, credential_id, report, yearmon)
         VALUES ('h-1', 'cred-1', 'TR', '2024-03')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO harvest_queue (guid, harvest_id) VALUES ('q-1', 'h-1')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO failed_harvests (guid, harvest_id, error_code, detail, process_step)
         VALUES ('f-1', 'h-1', 3000, 'Report Not Supported', 'Request')",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("DELETE FROM harvests WHERE guid = 'h-1'")
        .execute(&pool)
        .await
        .unwrap();

    let queue: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM harvest_queue")
        .fetch_one(&pool)
        .await
        .unwrap();
    let failures: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed_harvests")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(queue, 0);
    assert_eq!(failures, 0);
}
