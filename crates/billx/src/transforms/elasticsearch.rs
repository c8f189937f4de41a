//! 📡 Elasticsearch bulk rendering: two lines per line item, no more, no less.
//!
//! Rule 1: action metadata, then document source. Always.
//! Rule 2: newline-delimited. The trailing newline of the whole body is the
//!         sink worker's business, not ours.
//! Rule 3: the `_id` is the line item's deterministic identity. Same row on
//!         the next run, same id, so `create` turns the rerun into a 409
//!         instead of a duplicate.

use anyhow::{Context, Result};
use serde_json::json;

use super::{BulkTarget, EgressTransform};
use crate::common::LineItem;

/// 📡 Renders a [`LineItem`] as an action line plus a source line.
pub(crate) struct ElasticsearchBulk;

impl EgressTransform for ElasticsearchBulk {
    fn transform_line_item(item: &LineItem, target: &BulkTarget) -> Result<String> {
        let mut the_action_line = serde_json::Map::new();
        the_action_line.insert(
            target.action.as_str().to_string(),
            json!({ "_index": target.index, "_id": item.document_id() }),
        );
        let the_action = serde_json::to_string(&the_action_line)
            .context("💀 the bulk action line refused to become JSON")?;
        let the_source = serde_json::to_string(item).with_context(|| {
            format!(
                "💀 line item {} ({}) refused to become JSON",
                item.line_item_id, item.time_interval
            )
        })?;
        Ok(format!("{}\n{}", the_action, the_source))
    }
}
