//! 🔄 Transforms: what happens to a line item between the CSV and the index.
//!
//! 🎬 COLD OPEN, INT. ACCOUNTING, THE MORNING AFTER THE MIGRATION
//!
//! "Why does every document have four hundred fields called `pricing/something`?"
//! Because nobody stripped them. Now somebody does.
//!
//! Two steps, always in this order:
//!
//! ```text
//!   LineItem { any: {...400 columns...}, tags: {} }
//!        │  extract_tags        (lift resourceTags/user:* into tags, drop the rest)
//!        ▼
//!   LineItem { any: {}, tags: {team: "web"} }
//!        │  ElasticsearchBulk   (action line + source line)
//!        ▼
//!   {"create":{"_index":"billx-lineitems-123","_id":"9f86d0..."}}
//!   {"lineItemId":"...","unblendedCost":1.25,"tags":{"team":"web"}, ...}
//! ```
//!
//! 🧠 Knowledge graph:
//! - `EgressTransform` is the seam: the sink worker renders through it, never by hand
//! - Zero-sized marker types, static dispatch. The compiler does the rest. 🦆

use anyhow::Result;

use crate::backends::common_config::BulkWriteAction;
use crate::common::LineItem;

pub(crate) mod elasticsearch;
pub(crate) mod line_item_tags;

pub(crate) use elasticsearch::ElasticsearchBulk;
pub(crate) use line_item_tags::extract_tags;

/// 🎯 Where a rendered document goes and with which verb. Fixed for a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BulkTarget {
    pub index: String,
    pub action: BulkWriteAction,
}

impl BulkTarget {
    /// 🏷️ `{prefix}-lineitems-{account}`. One index per owning account.
    pub(crate) fn for_account(index_prefix: &str, account: &str, action: BulkWriteAction) -> Self {
        Self {
            index: format!("{}-lineitems-{}", index_prefix, account),
            action,
        }
    }
}

/// 📤 Turns a tag-extracted `LineItem` into the sink's wire format.
///
/// # Contract 📜
/// - Input is borrowed: a failed bulk request may want the item back some day
/// - Output is exactly what the sink worker appends to its buffer, minus the trailing newline
/// - The catch-all map is never part of the output
pub(crate) trait EgressTransform {
    fn transform_line_item(item: &LineItem, target: &BulkTarget) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_raw_row_travels_all_the_way_to_bulk_format() -> Result<()> {
        let mut the_item = LineItem {
            line_item_id: "li-1".to_string(),
            time_interval: "2023-01-01T00:00:00Z/2023-01-01T01:00:00Z".to_string(),
            invoice_id: "INV1".to_string(),
            unblended_cost: 0.5,
            ..Default::default()
        };
        the_item.any.insert("resourceTags/user:team".to_string(), "web".to_string());
        the_item.any.insert("pricing/term".to_string(), "OnDemand".to_string());

        extract_tags(&mut the_item);
        let the_target = BulkTarget::for_account("billx", "123456789012", BulkWriteAction::Create);
        let the_rendered = ElasticsearchBulk::transform_line_item(&the_item, &the_target)?;

        let the_lines: Vec<&str> = the_rendered.split('\n').collect();
        assert_eq!(the_lines.len(), 2);
        let the_action: serde_json::Value = serde_json::from_str(the_lines[0])?;
        assert_eq!(the_action["create"]["_index"], "billx-lineitems-123456789012");
        assert_eq!(the_action["create"]["_id"], the_item.document_id());
        let the_source: serde_json::Value = serde_json::from_str(the_lines[1])?;
        assert_eq!(the_source["tags"]["team"], "web");
        assert!(the_source.get("pricing/term").is_none());
        assert!(the_source.get("any").is_none());
        Ok(())
    }
}
