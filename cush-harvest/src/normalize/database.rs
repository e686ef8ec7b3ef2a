//! Database report (DR) normalization

use cush_common::db::models::Release;
use cush_common::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::facts::{insert_database_facts, DatabaseCounters, DatabaseFactRow};
use crate::report::scalar_string;
use crate::resolver::DimensionResolver;

use super::{deltas_release5, deltas_release51, MetricDeltas, NormalizeContext};

fn accumulate(deltas: &MetricDeltas) -> DatabaseCounters {
    let mut counters = DatabaseCounters::default();
    for (name, count) in deltas.iter() {
        match name {
            "Searches_Automated" => counters.searches_automated += count,
            "Searches_Federated" => counters.searches_federated += count,
            "Searches_Regular" => counters.searches_regular += count,
            "Total_Item_Investigations" => counters.total_item_investigations += count,
            "Total_Item_Requests" => counters.total_item_requests += count,
            "Unique_Item_Investigations" => counters.unique_item_investigations += count,
            "Unique_Item_Requests" => counters.unique_item_requests += count,
            "Limit_Exceeded" => counters.limit_exceeded += count,
            "No_License" => counters.no_license += count,
            _ => {} // not part of the DR vocabulary
        }
    }
    counters
}

/// Normalize DR report items into `database_report_facts`
///
/// Items without a database name carry no usable key and are skipped.
pub async fn normalize(
    pool: &SqlitePool,
    resolver: &mut DimensionResolver,
    context: &NormalizeContext,
    items: &[Value],
) -> Result<u64> {
    let mut rows = Vec::new();

    for item in items {
        let Some(database_name) = scalar_string(item, "Database") else {
            debug!("skipping DR item without database name");
            continue;
        };
        let Some(database_id) = resolver.database_id(&database_name).await? else {
            continue;
        };

        let platform_id = match scalar_string(item, "Platform") {
            Some(name) => resolver.platform_id(&name).await?,
            None => None,
        };
        let publisher_id = match scalar_string(item, "Publisher") {
            Some(name) => resolver.publisher_id(&name).await?,
            None => None,
        };

        match context.release {
            Release::R5 => {
                let counters = accumulate(&deltas_release5(item, &context.yearmon));
                if counters.is_zero() {
                    continue;
                }
                rows.push(DatabaseFactRow {
                    database_id,
                    platform_id,
                    publisher_id,
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
                    rows.push(DatabaseFactRow {
                        database_id: database_id.clone(),
                        platform_id: platform_id.clone(),
                        publisher_id: publisher_id.clone(),
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

    insert_database_facts(pool, &context.scope(), &rows).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::facts::database_fact_sums;
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
    async fn test_searches_accumulate_and_nameless_items_skip() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        let items = vec![
            json!({
                "Database": "Academic Search",
                "Platform": "EBSCOhost",
                "Performance": [{
                    "Period": {"Begin_Date": "2024-03-01", "End_Date": "2024-03-31"},
                    "Instance": [
                        {"Metric_Type": "Searches_Regular", "Count": 120},
                        {"Metric_Type": "Searches_Automated", "Count": 3}
                    ]
                }]
            }),
            // No database name: skipped, never an error
            json!({
                "Platform": "EBSCOhost",
                "Performance": [{
                    "Period": {"Begin_Date": "2024-03-01", "End_Date": "2024-03-31"},
                    "Instance": [{"Metric_Type": "Searches_Regular", "Count": 9}]
                }]
            }),
        ];

        let inserted = normalize(&pool, &mut resolver, &context(Release::R5), &items)
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let sums = database_fact_sums(&pool, "prov-1", "inst-1", "2024-03")
            .await
            .unwrap();
        assert_eq!(sums.searches_regular, 120);
        assert_eq!(sums.searches_automated, 3);
    }

    #[tokio::test]
    async fn test_release51_blocks_become_rows() {
        let pool = test_pool().await;
        let mut resolver = DimensionResolver::load(&pool, TextLimits::default())
            .await
            .unwrap();

        let items = vec![json!({
            "Database": "Academic Search",
            "Platform": "EBSCOhost",
            "Attribute_Performance": [
                {
                    "Data_Type": "Database_Full_Item",
                    "Performance": {"Searches_Regular": {"2024-03": 120}}
                },
                {
                    "Data_Type": "Database_AI",
                    "Performance": {"Searches_Automated": {"2024-03": 3}}
                }
            ]
        })];

        let inserted = normalize(&pool, &mut resolver, &context(Release::R5_1), &items)
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let sums = database_fact_sums(&pool, "prov-1", "inst-1", "2024-03")
            .await
            .unwrap();
        assert_eq!(sums.searches_regular, 120);
        assert_eq!(sums.searches_automated, 3);
    }
}
