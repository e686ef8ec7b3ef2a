//! Item report (IR) normalization
//!
//! The only family with parent/child structure. Release 5 attaches an
//! `Item_Parent` to each report item; release 5.1 groups child items
//! under a parent entry's `Items` array. Either way the parent title is
//! resolved first, then a parent "item" envelope keyed by (title, parent
//! data type), and only then the child item that fact rows reference.

use cush_common::db::models::Release;
use cush_common::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::facts::{insert_item_facts, ItemCounters, ItemFactRow};
use crate::report::{identifiers, scalar_string};
use crate::resolver::{DimensionResolver, TitleInput, TitleType};

use super::{deltas_release5, deltas_release51, MetricDeltas, NormalizeContext};

fn accumulate(deltas: &MetricDeltas) -> ItemCounters {
    let mut counters = ItemCounters::default();
    for (name, count) in deltas.iter() {
        match name {
            "Total_Item_Investigations" => counters.total_item_investigations += count,
            "Total_Item_Requests" => counters.total_item_requests += count,
            "Unique_Item_Investigations" => counters.unique_item_investigations += count,
            "Unique_Item_Requests" => counters.unique_item_requests += count,
            "Limit_Exceeded" => counters.limit_exceeded += count,
            "No_License" => counters.no_license += count,
            _ => {} // not part of the IR vocabulary
        }
    }
    counters
}

/// Normalize IR report items into `item_report_facts`
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

    insert_item_facts(pool, &context.scope(), &rows).await
}

/// Resolve the parent title and its envelope item, if parent data exists
async fn resolve_parent(
    resolver: &mut DimensionResolver,
    name: Option<String>,
    item_id: Option<&Value>,
    data_type: Option<String>,
) -> Result<Option<String>> {
    let input = TitleInput {
        title: name.unwrap_or_default(),
        title_type: Some(TitleType::from_data_type(data_type.as_deref())),
        ids: identifiers(item_id),
        article_version: None,
        pub_date: None,
    };
    let Some(parent_title_id) = resolver.title_id(&input).await? else {
        return Ok(None);
    };

    let parent_data_type_id = match data_type {
        Some(name) => resolver.data_type_id(&name).await?,
        None => None,
    };

    let envelope = resolver
        .parent_item_id(&parent_title_id, parent_data_type_id.as_deref())
        .await?;
    Ok(Some(envelope))
}

async fn prepare_release5(
    resolver: &mut DimensionResolver,
    context: &NormalizeContext,
    item: &Value,
) -> Result<Option<ItemFactRow>> {
    let input = TitleInput {
        title: scalar_string(item, "Item").unwrap_or_default(),
        title_type: Some(TitleType::Item),
        ids: identifiers(item.get("Item_ID")),
        article_version: scalar_string(item, "Article_Version"),
        pub_date: scalar_string(item, "Publication_Date"),
    };
    let Some(title_id) = resolver.title_id(&input).await? else {
        debug!("skipping IR item without name or identifier");
        return Ok(None);
    };

    let counters = accumulate(&deltas_release5(item, &context.yearmon));
    if counters.is_zero() {
        return Ok(None);
    }

    // Item_Parent is an object, or occasionally a one-element array
    let parent = match item.get("Item_Parent") {
        Some(Value::Array(list)) => list.first(),
        Some(parent) => Some(parent),
        None => None,
    };
    let parent_item_id = match parent {
        Some(parent) => {
            resolve_parent(
                resolver,
                scalar_string(parent, "Item_Name"),
                parent.get("Item_ID"),
                scalar_string(parent, "Data_Type"),
            )
            .await?
        }
        None => None,
    };

    let data_type_id = match scalar_string(item, "Data_Type") {
        Some(name) => resolver.data_type_id(&name).await?,
        None => None,
    };
    let item_row_id = resolver
        .item_id(&title_id, parent_item_id.as_deref(), data_type_id.as_deref())
        .await?;

    Ok(Some(ItemFactRow {
        item_id: item_row_id,
        platform_id: match scalar_string(item, "Platform") {
            Some(name) => resolver.platform_id(&name).await?,
            None => None,
        },
        publisher_id: match scalar_string(item, "Publisher") {
            Some(name) => resolver.publisher_id(&name).await?,
            None => None,
        },
        data_type_id,
        access_type_id: match scalar_string(item, "Access_Type") {
            Some(name) => resolver.access_type_id(&name).await?,
            None => None,
        },
        access_method_id: match scalar_string(item, "Access_Method") {
            Some(name) => resolver.access_method_id(&name).await?,
            None => None,
        },
        yop: scalar_string(item, "YOP"),
        counters,
    }))
}

/// Release 5.1: parent entry with an `Items` array of children, each
/// carrying its own attribute-performance blocks
async fn prepare_release51(
    resolver: &mut DimensionResolver,
    context: &NormalizeContext,
    entry: &Value,
    rows: &mut Vec<ItemFactRow>,
) -> Result<()> {
    let platform_id = match scalar_string(entry, "Platform") {
        Some(name) => resolver.platform_id(&name).await?,
        None => None,
    };
    let publisher_id = match scalar_string(entry, "Publisher") {
        Some(name) => resolver.publisher_id(&name).await?,
        None => None,
    };

    // With parent details the children sit under Items; without, the
    // entry itself is the item
    let (children, parent_item_id) = match entry.get("Items").and_then(Value::as_array) {
        Some(children) => {
            let parent = resolve_parent(
                resolver,
                scalar_string(entry, "Title"),
                entry.get("Item_ID"),
                scalar_string(entry, "Data_Type"),
            )
            .await?;
            (children.as_slice(), parent)
        }
        None => (std::slice::from_ref(entry), None),
    };

    for child in children {
        let Some(blocks) = child.get("Attribute_Performance").and_then(Value::as_array) else {
            continue;
        };

        for block in blocks {
            let input = TitleInput {
                title: scalar_string(child, "Item").unwrap_or_default(),
                title_type: Some(TitleType::Item),
                ids: identifiers(child.get("Item_ID")),
                article_version: scalar_string(block, "Article_Version")
                    .or_else(|| scalar_string(child, "Article_Version")),
                pub_date: scalar_string(child, "Publication_Date"),
            };
            let Some(title_id) = resolver.title_id(&input).await? else {
                debug!("skipping IR item without name or identifier");
                continue;
            };

            let performance = block.get("Performance").unwrap_or(&Value::Null);
            let counters = accumulate(&deltas_release51(performance, &context.yearmon));
            if counters.is_zero() {
                continue;
            }

            let data_type_id = match scalar_string(block, "Data_Type") {
                Some(name) => resolver.data_type_id(&name).await?,
                None => None,
            };
            let item_row_id = resolver
                .item_id(&title_id, parent_item_id.as_deref(), data_type_id.as_deref())
                .await?;

            rows.push(ItemFactRow {
                item_id: item_row_id,
                platform_id: platform_id.clone(),
                publisher_id: publisher_id.clone(),
                data_type_id,
                access_type_id: match scalar_string(block, "Access_Type") {
                    Some(name) => resolver.access_type_id(&name).await?,
                    None => None,
                },
                access_method_id: match scalar_string(block, "Access_Method") {
                    Some(name) => resolver.access_method_id(&name).await?,
                    None => None,
                },
                yop: scalar_string(block, "YOP"),
                counters,
            });
        }
    }

    Ok(())
}
