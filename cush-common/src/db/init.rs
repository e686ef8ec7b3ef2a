//! Database initialization
//!
//! Opens (or creates) the shared SQLite database and brings the schema up
//! idempotently. Every `create_*_table` function is safe to call on an
//! existing database.

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::Result;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys so cascading deletes work
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL mode allows concurrent readers while a harvest writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Bounded lock waits: concurrent harvests contend on dimension inserts
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_all_tables(&pool).await?;

    Ok(pool)
}

/// Create every table and index used by the harvesting core
///
/// Idempotent; also used directly by tests against `sqlite::memory:`.
pub async fn create_all_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    create_institutions_table(pool).await?;
    create_providers_table(pool).await?;
    create_credentials_table(pool).await?;
    create_harvests_table(pool).await?;
    create_failed_harvests_table(pool).await?;
    create_harvest_queue_table(pool).await?;

    // Dimension tables
    create_name_dimension_tables(pool).await?;
    create_titles_table(pool).await?;
    create_items_table(pool).await?;

    // Fact tables, one per report family
    create_title_report_facts_table(pool).await?;
    create_database_report_facts_table(pool).await?;
    create_platform_report_facts_table(pool).await?;
    create_item_report_facts_table(pool).await?;

    Ok(())
}

async fn create_institutions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS institutions (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_providers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS providers (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            server_url TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Registry of COUNTER releases each provider serves
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS provider_releases (
            provider_id TEXT NOT NULL REFERENCES providers(guid) ON DELETE CASCADE,
            release TEXT NOT NULL CHECK (release IN ('5', '5.1')),
            PRIMARY KEY (provider_id, release)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Connector query parameters the provider declares as required
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS provider_connectors (
            provider_id TEXT NOT NULL REFERENCES providers(guid) ON DELETE CASCADE,
            connector TEXT NOT NULL CHECK (connector IN
                ('customer_id', 'requestor_id', 'api_key', 'extra_args', 'platform')),
            PRIMARY KEY (provider_id, connector)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_credentials_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credentials (
            guid TEXT PRIMARY KEY,
            institution_id TEXT NOT NULL REFERENCES institutions(guid) ON DELETE CASCADE,
            provider_id TEXT NOT NULL REFERENCES providers(guid) ON DELETE CASCADE,
            release TEXT NOT NULL DEFAULT '5' CHECK (release IN ('5', '5.1')),
            status TEXT NOT NULL DEFAULT 'Enabled'
                CHECK (status IN ('Enabled', 'Suspended', 'Incomplete')),
            customer_id TEXT,
            requestor_id TEXT,
            api_key TEXT,
            extra_args TEXT,
            platform TEXT,
            last_success_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (institution_id, provider_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_harvests_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvests (
            guid TEXT PRIMARY KEY,
            credential_id TEXT NOT NULL REFERENCES credentials(guid) ON DELETE CASCADE,
            report TEXT NOT NULL CHECK (report IN ('TR', 'DR', 'PR', 'IR')),
            yearmon TEXT NOT NULL,
            release TEXT NOT NULL DEFAULT '5' CHECK (release IN ('5', '5.1')),
            status TEXT NOT NULL DEFAULT 'New'
                CHECK (status IN ('New', 'Queued', 'Pending', 'Harvesting', 'Waiting',
                                  'Paused', 'ReQueued', 'Success', 'Fail')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (credential_id, report, yearmon)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_harvests_status ON harvests(status)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_failed_harvests_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS failed_harvests (
            guid TEXT PRIMARY KEY,
            harvest_id TEXT NOT NULL REFERENCES harvests(guid) ON DELETE CASCADE,
            error_code INTEGER NOT NULL,
            detail TEXT NOT NULL,
            help_url TEXT,
            process_step TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_failed_harvests_harvest ON failed_harvests(harvest_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_harvest_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvest_queue (
            guid TEXT PRIMARY KEY,
            harvest_id TEXT NOT NULL UNIQUE REFERENCES harvests(guid) ON DELETE CASCADE,
            replace_data INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Simple name-keyed dimension tables, deduplicated case-insensitively
async fn create_name_dimension_tables(pool: &SqlitePool) -> Result<()> {
    for table in [
        "platforms",
        "publishers",
        "access_types",
        "access_methods",
        "data_types",
        "section_types",
        "databases",
    ] {
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                guid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        );
        sqlx::query(&create).execute(pool).await?;

        let index = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_name ON {table}(name COLLATE NOCASE)"
        );
        sqlx::query(&index).execute(pool).await?;
    }

    Ok(())
}

async fn create_titles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS titles (
            guid TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            title_type TEXT NOT NULL DEFAULT 'Unknown'
                CHECK (title_type IN ('Book', 'Journal', 'Item', 'Unknown')),
            issn TEXT,
            eissn TEXT,
            isbn TEXT,
            doi TEXT,
            proprietary_id TEXT,
            uri TEXT,
            article_version TEXT,
            pub_date TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_titles_title ON titles(title COLLATE NOCASE)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            guid TEXT PRIMARY KEY,
            title_id TEXT NOT NULL REFERENCES titles(guid),
            parent_item_id TEXT REFERENCES items(guid),
            data_type_id TEXT REFERENCES data_types(guid),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_title ON items(title_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_title_report_facts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS title_report_facts (
            guid TEXT PRIMARY KEY,
            title_id TEXT NOT NULL REFERENCES titles(guid),
            provider_id TEXT NOT NULL REFERENCES providers(guid),
            institution_id TEXT NOT NULL REFERENCES institutions(guid),
            platform_id TEXT REFERENCES platforms(guid),
            publisher_id TEXT REFERENCES publishers(guid),
            data_type_id TEXT REFERENCES data_types(guid),
            section_type_id TEXT REFERENCES section_types(guid),
            access_type_id TEXT REFERENCES access_types(guid),
            access_method_id TEXT REFERENCES access_methods(guid),
            yop TEXT,
            yearmon TEXT NOT NULL,
            total_item_investigations INTEGER NOT NULL DEFAULT 0,
            total_item_requests INTEGER NOT NULL DEFAULT 0,
            unique_item_investigations INTEGER NOT NULL DEFAULT 0,
            unique_item_requests INTEGER NOT NULL DEFAULT 0,
            unique_title_investigations INTEGER NOT NULL DEFAULT 0,
            unique_title_requests INTEGER NOT NULL DEFAULT 0,
            limit_exceeded INTEGER NOT NULL DEFAULT 0,
            no_license INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_title_facts_triple
         ON title_report_facts(provider_id, institution_id, yearmon)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_database_report_facts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS database_report_facts (
            guid TEXT PRIMARY KEY,
            database_id TEXT NOT NULL REFERENCES databases(guid),
            provider_id TEXT NOT NULL REFERENCES providers(guid),
            institution_id TEXT NOT NULL REFERENCES institutions(guid),
            platform_id TEXT REFERENCES platforms(guid),
            publisher_id TEXT REFERENCES publishers(guid),
            data_type_id TEXT REFERENCES data_types(guid),
            access_method_id TEXT REFERENCES access_methods(guid),
            yearmon TEXT NOT NULL,
            searches_automated INTEGER NOT NULL DEFAULT 0,
            searches_federated INTEGER NOT NULL DEFAULT 0,
            searches_regular INTEGER NOT NULL DEFAULT 0,
            total_item_investigations INTEGER NOT NULL DEFAULT 0,
            total_item_requests INTEGER NOT NULL DEFAULT 0,
            unique_item_investigations INTEGER NOT NULL DEFAULT 0,
            unique_item_requests INTEGER NOT NULL DEFAULT 0,
            limit_exceeded INTEGER NOT NULL DEFAULT 0,
            no_license INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_database_facts_triple
         ON database_report_facts(provider_id, institution_id, yearmon)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_platform_report_facts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS platform_report_facts (
            guid TEXT PRIMARY KEY,
            platform_id TEXT NOT NULL REFERENCES platforms(guid),
            provider_id TEXT NOT NULL REFERENCES providers(guid),
            institution_id TEXT NOT NULL REFERENCES institutions(guid),
            data_type_id TEXT REFERENCES data_types(guid),
            access_method_id TEXT REFERENCES access_methods(guid),
            yearmon TEXT NOT NULL,
            searches_platform INTEGER NOT NULL DEFAULT 0,
            total_item_investigations INTEGER NOT NULL DEFAULT 0,
            total_item_requests INTEGER NOT NULL DEFAULT 0,
            unique_item_investigations INTEGER NOT NULL DEFAULT 0,
            unique_item_requests INTEGER NOT NULL DEFAULT 0,
            unique_title_investigations INTEGER NOT NULL DEFAULT 0,
            unique_title_requests INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_platform_facts_triple
         ON platform_report_facts(provider_id, institution_id, yearmon)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_item_report_facts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_report_facts (
            guid TEXT PRIMARY KEY,
            item_id TEXT NOT NULL REFERENCES items(guid),
            provider_id TEXT NOT NULL REFERENCES providers(guid),
            institution_id TEXT NOT NULL REFERENCES institutions(guid),
            platform_id TEXT REFERENCES platforms(guid),
            publisher_id TEXT REFERENCES publishers(guid),
            data_type_id TEXT REFERENCES data_types(guid),
            access_type_id TEXT REFERENCES access_types(guid),
            access_method_id TEXT REFERENCES access_methods(guid),
            yop TEXT,
            yearmon TEXT NOT NULL,
            total_item_investigations INTEGER NOT NULL DEFAULT 0,
            total_item_requests INTEGER NOT NULL DEFAULT 0,
            unique_item_investigations INTEGER NOT NULL DEFAULT 0,
            unique_item_requests INTEGER NOT NULL DEFAULT 0,
            limit_exceeded INTEGER NOT NULL DEFAULT 0,
            no_license INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_item_facts_triple
         ON item_report_facts(provider_id, institution_id, yearmon)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
