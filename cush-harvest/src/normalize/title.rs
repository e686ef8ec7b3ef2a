//! Title report (TR) normalization

use cush_common::db::models::Release;
use cush_common::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::facts::{insert_title_facts, TitleCounters, TitleFactRow};
use crate::report::{identifiers, scalar_string};
use crate::resolver::{DimensionResolver, TitleInput, TitleType};

use super::{deltas_release5, deltas_release51, MetricDeltas, NormalizeContext};

fn accumulate(deltas: &MetricDeltas) -> TitleCounters {
    let mut counters = TitleCounters::default();
    for (name, count) in deltas.iter() {
        match name {
            "Total_Item_Investigations" => counters.total_item_investigations += count,
            "Total_Item_Requests" => counters.total_item_requests += count,
            "Unique_Item_Investigations" => counters.unique_item_investigations += count,
            "Unique_Item_Requests" => counters.unique_item_requests += count,
            "Unique_Title_Investigations" => counters.unique_title_investigations += count,
            "Unique_Title_Requests" => counters.unique_title_requests += count,
            "Limit_Exceeded" => counters.limit_exceeded += count,
            "No_License" => counters.no_license += count,
            _ => {} // not part of the TR vocabulary
        }
    }
    counters
}

/// Normalize TR report items into `title_report_facts`
pub async fn normalize(
    pool: &SqlitePool,
    resolver: &mut DimensionResolver,
    context: &NormalizeContext,
    items: &[Value],
) -> Result<u64> {
    let mut rows = Vec::new();

    for item in items {
        match context.release {
            Release::R5 => {
                if let Some(row) = prepare_release5(resolver, context, item).await? {
                    rows.push(row);
                }
            }
            Release::R5_1 => {
                prepare_release51(resolver, context, item, &mut rows).await?;
            }
        }
    }

    insert_title_facts(pool, &context.scope(), &rows).await
}

async fn prepare_release5(
    resolver: &mut DimensionResolver,
    context: &NormalizeContext,
    item: &Value,
) -> Result<Option<TitleFactRow>> {
    let data_type_name = scalar_string(item, "Data_Type");

    let input = TitleInput {
        title: scalar_string(item, "Title").unwrap_or_default(),
        title_type: Some(TitleType::from_data_type(data_type_name.as_deref())),
        ids: identifiers(item.get("Item_ID")),
        article_version: None,
        pub_date: None,
    };
    let Some(title_id) = resolver.title_id(&input).await? else {
        debug!("skipping TR item without title or identifier");
        return Ok(None);
    };

    let counters = accumulate(&deltas_release5(item, &context.yearmon));
    if counters.is_zero() {
        return Ok(None);
    }

    Ok(Some(TitleFactRow {
        title_id,
        platform_id: resolve_opt(resolver, item, "Platform", Dim::Platform).await?,
        publisher_id: resolve_opt(resolver, item, "Publisher", Dim::Publisher).await?,
        data_type_id: match &data_type_name {
            Some(name) => resolver.data_type_id(name).await?,
            None => None,
        },
        section_type_id: resolve_opt(resolver, item, "Section_Type", Dim::SectionType).await?,
        access_type_id: resolve_opt(resolver, item, "Access_Type", Dim::AccessType).await?,
        access_method_id: resolve_opt(resolver, item, "Access_Method", Dim::AccessMethod).await?,
        yop: scalar_string(item, "YOP"),
        counters,
    }))
}

/// Release 5.1: one fact row per attribute-performance block
async fn prepare_release51(
    resolver: &mut DimensionResolver,
    context: &NormalizeContext,
    item: &Value,
    rows: &mut Vec<TitleFactRow>,
) -> Result<()> {
    let Some(blocks) = item.get("Attribute_Performance").and_then(Value::as_array) else {
        return Ok(());
    };

    let platform_id = resolve_opt(resolver, item, "Platform", Dim::Platform).await?;
    let publisher_id = resolve_opt(resolver, item, "Publisher", Dim::Publisher).await?;

    for block in blocks {
        let data_type_name = scalar_string(block, "Data_Type");

        let input = TitleInput {
            title: scalar_string(item, "Title").unwrap_or_default(),
            title_type: Some(TitleType::from_data_type(data_type_name.as_deref())),
            ids: identifiers(item.get("Item_ID")),
            article_version: None,
            pub_date: None,
        };
        let Some(title_id) = resolver.title_id(&input).await? else {
            debug!("skipping TR item without title or identifier");
            continue;
        };

        let performance = block.get("Performance").unwrap_or(&Value::Null);
        let counters = accumulate(&deltas_release51(performance, &context.yearmon));
        if counters.is_zero() {
            continue;
        }

        rows.push(TitleFactRow {
            title_id,
            platform_id: platform_id.clone(),
            publisher_id: publisher_id.clone(),
            data_type_id: match &data_type_name {
                Some(name) => resolver.data_type_id(name).await?,
                None => None,
            },
            // Section_Type does not exist in the 5.1 shape
            section_type_id: None,
            access_type_id: resolve_opt(resolver, block, "Access_Type", Dim::AccessType).await?,
            access_method_id: resolve_opt(resolver, block, "Access_Method", Dim::AccessMethod)
                .await?,
            yop: scalar_string(block, "YOP"),
            counters,
        });
    }

    Ok(())
}

enum Dim {
    Platform,
    Publisher,
    AccessType,
    AccessMethod,
    SectionType,
}

async fn resolve_opt(
    resolver: &mut DimensionResolver,
    value: &Value,
    key: &str,
    dim: Dim,
) -> Result<Option<String>> {
    let Some(name) = scalar_string(value, key) else {
        return Ok(None);
    };
    match dim {
        Dim::Platform => resolver.platform_id(&name).await,
        Dim::Publisher => resolver.publisher_id(&name).await,
        Dim::AccessType => resolver.access_type_id(&name).await,
        Dim::AccessMethod => resolver.access_method_id(&name).await,
        Dim::SectionType => resolver.section_type_id(&name).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::facts::title_fact_sums;
    use crate::resolver::TextLimits;
    use cush_common::db::create_all_tables;
    use cush_common::db::models::Release;
    use serde_json::json;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        create_all_tables(&pool).await.unwrap();
        sqlx::query("INSERT INTO institutions (guid, name) VALUES ('inst-1', 'U')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO providers (guid, name, server_url) VALUES ('prov-1', 'P', 'https://x')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    fn context(release: Release, replace: bool) -> NormalizeContext {
        NormalizeContext {
            provider_id: "prov-1".to_string(),
            institution_id: "inst-1".to_string(),
            yearmon: "2024-03".parse().unwrap(),
            release,
            replace,
        }
    }

    fn r5_items() -> Vec<Value> {
        vec![
            json!({
                "Title": "Nature",
                "Item_ID": [{"Type": "Print_ISSN", "Value": "0028-0836"}],
                "Platform": "NaturePlatform",
                "Publisher": "Springer Nature",
                "Data_Type": "Journal",
                "Section_Type": "Article",
                "Access_Type": "Controlled",
                "Access_Method": "Regular",
                "Performance": [
                    {
                        "Period": {"Begin_Date": "2024-02-01", "End_Date": "2024-02-29"},
                        "Instance": [{"Metric_Type": "Total_Item_Requests", "Count": 99}]
                    },
                    {
                        "Period": {"Begin_Date": "2024-03-01", "End_Date": "2024-03-31"},
                        "Instance": [
                            {"Metric_Type": "Total_Item_Requests", "Count": 10},
                            {"Metric_Type": "Unique_Item_Requests", "Count": 4},
                            {"Metric_Type": "Made_Up_Metric", "Count": 1000}
                        ]
                    }
                ]
            }),
            // No identifying key at all: silently skipped
            json!({
                "Platform": "NaturePlatform",
                "Performance": [{
                    "Period": {"Begin_Date": "2024-03-01", "End_Date": "2024-03-31"},
                    "Instance": [{"Metric_Type": "Total_Item_Requests", "Count": 7}]
                }]
            }),
        ]
    }

    fn r51_items() -> Vec<Value> {
        vec![json!({
            "Title": "Nature",
            "Item_ID": {"Print_ISSN": "0028-0836"},
            "Platform": "NaturePlatform",
            "Publisher": "Springer Nature",
            "Attribute_Performance": [{
                "Data_Type": "Journal",
                "Access_Type": "Controlled",
                "Performance": {
                    "Total_Item_Requests": {"2024-02": 99, "2024-03": 10},
                    "Unique_Item_Requests": {"2024-03": 4},
                    "Made_Up_Metric": {"2024-03": 1000}
                }
            }]
        })]
    }

    #[tokio::test]
    async fn test_release5_single_row_matching_period_only() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();
        let context = context(Release::R5, false);

        let inserted = normalize(&pool, &mut resolver, &context, &r5_items())
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let sums = title_fact_sums(&pool, "prov-1", "inst-1", "2024-03")
            .await
            .unwrap();
        assert_eq!(sums.total_item_requests, 10);
        assert_eq!(sums.unique_item_requests, 4);
        assert_eq!(sums.total_item_investigations, 0);
    }

    #[tokio::test]
    async fn test_release_shapes_normalize_identically() {
        let pool5 = test_pool().await;
        let mut resolver5 = DimensionResolver::load(&pool5, TextLimits::default())
            .await
            .unwrap();
        normalize(&pool5, &mut resolver5, &context(Release::R5, false), &r5_items())
            .await
            .unwrap();
        let sums5 = title_fact_sums(&pool5, "prov-1", "inst-1", "2024-03")
            .await
            .unwrap();

        let pool51 = test_pool().await;
        let mut resolver51 = DimensionResolver::load(&pool51, TextLimits::default())
            .await
            .unwrap();
        normalize(
            &pool51,
            &mut resolver51,
            &context(Release::R5_1, false),
            &r51_items(),
        )
        .await
        .unwrap();
        let sums51 = title_fact_sums(&pool51, "prov-1", "inst-1", "2024-03")
            .await
            .unwrap();

        assert_eq!(sums5, sums51);
    }

    #[tokio::test]
    async fn test_replace_run_purges_prior_rows() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        normalize(&pool, &mut resolver, &context(Release::R5, false), &r5_items())
            .await
            .unwrap();
        normalize(&pool, &mut resolver, &context(Release::R5, true), &r5_items())
            .await
            .unwrap();

        // Only the replacing run's rows survive
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM title_report_facts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let sums = title_fact_sums(&pool, "prov-1", "inst-1", "2024-03")
            .await
            .unwrap();
        assert_eq!(sums.total_item_requests, 10);
    }

    #[tokio::test]
    async fn test_append_run_accumulates() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        normalize(&pool, &mut resolver, &context(Release::R5, false), &r5_items())
            .await
            .unwrap();
        normalize(&pool, &mut resolver, &context(Release::R5, false), &r5_items())
            .await
            .unwrap();

        let sums = title_fact_sums(&pool, "prov-1", "inst-1", "2024-03")
            .await
            .unwrap();
        assert_eq!(sums.total_item_requests, 20);
    }

    #[tokio::test]
    async fn test_replace_scoped_to_triple() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO institutions (guid, name) VALUES ('inst-2', 'Other U')")
            .execute(&pool)
            .await
            .unwrap();
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        normalize(&pool, &mut resolver, &context(Release::R5, false), &r5_items())
            .await
            .unwrap();

        let mut other = context(Release::R5, true);
        other.institution_id = "inst-2".to_string();
        normalize(&pool, &mut resolver, &other, &r5_items())
            .await
            .unwrap();

        // The replace run only touched its own triple
        let sums = title_fact_sums(&pool, "prov-1", "inst-1", "2024-03")
            .await
            .unwrap();
        assert_eq!(sums.total_item_requests, 10);
    }
}
