//! Platform report (PR) normalization

use cush_common::db::models::Release;
use cush_common::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::facts::{insert_platform_facts, PlatformCounters, PlatformFactRow};
use crate::report::scalar_string;
use crate::resolver::DimensionResolver;

use super::{deltas_release5, deltas_release51, MetricDeltas, NormalizeContext};

fn accumulate(deltas: &MetricDeltas) -> PlatformCounters {
    let mut counters = PlatformCounters::default();
    for (name, count) in deltas.iter() {
        match name {
            "Searches_Platform" => counters.searches_platform += count,
            "Total_Item_Investigations" => counters.total_item_investigations += count,
            "Total_Item_Requests" => counters.total_item_requests += count,
            "Unique_Item_Investigations" => counters.unique_item_investigations += count,
            "Unique_Item_Requests" => counters.unique_item_requests += count,
            "Unique_Title_Investigations" => counters.unique_title_investigations += count,
            "Unique_Title_Requests" => counters.unique_title_requests += count,
            _ => {} // not part of the PR vocabulary
        }
    }
    counters
}

/// Normalize PR report items into `platform_report_facts`
///
/// Items without a platform name carry no usable key and are skipped.
pub async fn normalize(
    pool: &SqlitePool,
    resolver: &mut DimensionResolver,
    context: &NormalizeContext,
    items: &[Value],
) -> Result<u64> {
    let mut rows = Vec::new();

    for item in items {
        let Some(platform_name) = scalar_string(item, "Platform") else {
            debug!("skipping PR item without platform name");
            continue;
        };
        let Some(platform_id) = resolver.platform_id(&platform_name).await? else {
            continue;
        };

        match context.release {
            Release::R5 => {
                let counters = accumulate(&deltas_release5(item, &context.yearmon));
                if counters.is_zero() {
                    continue;
                }
                rows.push(PlatformFactRow {
                    platform_id,
                    data_type_id: match scalar_string(item, "Data_Type") {
                        Some(name) => resolver.data_type_id(&name).await?,
                        None => None,
                    },
                    access_method_id: match scalar_string(item, "Access_Method") {
                        Some(name) => resolver.access_method_id(&name).await?,
                        None => None,
                    },
                    counters,
                });
            }
            Release::R5_1 => {
                let Some(blocks) = item.get("Attribute_Performance").and_then(Value::as_array)
                else {
                    continue;
                };
                for block in blocks {
                    let performance = block.get("Performance").unwrap_or(&Value::Null);
                    let counters = accumulate(&deltas_release51(performance, &context.yearmon));
                    if counters.is_zero() {
                        continue;
                    }
                    rows.push(PlatformFactRow {
                        platform_id: platform_id.clone(),
                        data_type_id: match scalar_string(block, "Data_Type") {
                            Some(name) => resolver.data_type_id(&name).await?,
                            None => None,
                        },
                        access_method_id: match scalar_string(block, "Access_Method") {
                            Some(name) => resolver.access_method_id(&name).await?,
                            None => None,
                        },
                        counters,
                    });
                }
            }
        }
    }

    insert_platform_facts(pool, &context.scope(), &rows).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::facts::platform_fact_sums;
    use crate::resolver::TextLimits;
    use cush_common::db::create_all_tables;
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

    fn context(release: Release) -> NormalizeContext {
        NormalizeContext {
            provider_id: "prov-1".to_string(),
            institution_id: "inst-1".to_string(),
            yearmon: "2024-03".parse().unwrap(),
            release,
            replace: false,
        }
    }

    #[tokio::test]
    async fn test_platform_rows_and_skips() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        let items = vec![
            json!({
                "Platform": "JSTOR",
                "Data_Type": "Platform",
                "Performance": [{
                    "Period": {"Begin_Date": "2024-03-01", "End_Date": "2024-03-31"},
                    "Instance": [
                        {"Metric_Type": "Searches_Platform", "Count": 55},
                        {"Metric_Type": "Unique_Title_Requests", "Count": 8}
                    ]
                }]
            }),
            // No platform: skipped
            json!({
                "Performance": [{
                    "Period": {"Begin_Date": "2024-03-01", "End_Date": "2024-03-31"},
                    "Instance": [{"Metric_Type": "Searches_Platform", "Count": 1}]
                }]
            }),
        ];

        let inserted = normalize(&pool, &mut resolver, &context(Release::R5), &items)
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let sums = platform_fact_sums(&pool, "prov-1", "inst-1", "2024-03")
            .await
            .unwrap();
        assert_eq!(sums.searches_platform, 55);
        assert_eq!(sums.unique_title_requests, 8);
    }

    #[tokio::test]
    async fn test_release_shapes_agree() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        let r5 = vec![json!({
            "Platform": "JSTOR",
            "Performance": [{
                "Period": {"Begin_Date": "2024-03-01", "End_Date": "2024-03-31"},
                "Instance": [{"Metric_Type": "Searches_Platform", "Count": 55}]
            }]
        })];
        normalize(&pool, &mut resolver, &context(Release::R5), &r5)
            .await
            .unwrap();
        let sums5 = platform_fact_sums(&pool, "prov-1", "inst-1", "2024-03")
            .await
            .unwrap();

        // Same logical usage in the 5.1 shape, different institution scope
        sqlx::query("INSERT INTO institutions (guid, name) VALUES ('inst-2', 'U2')")
            .execute(&pool)
            .await
            .unwrap();
        let r51 = vec![json!({
            "Platform": "JSTOR",
            "Attribute_Performance": [{
                "Performance": {"Searches_Platform": {"2024-03": 55}}
            }]
        })];
        let mut context51 = context(Release::R5_1);
        context51.institution_id = "inst-2".to_string();
        normalize(&pool, &mut resolver, &context51, &r51)
            .await
            .unwrap();
        let sums51 = platform_fact_sums(&pool, "prov-1", "inst-2", "2024-03")
            .await
            .unwrap();

        assert_eq!(sums5, sums51);
    }
}
