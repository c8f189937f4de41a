use crate::common::LineItem;

/// 🏷️ Columns carrying user-defined resource tags start with this.
pub const RESOURCE_TAG_PREFIX: &str = "resourceTags/user:";

/// 🏷️ Lift `resourceTags/user:*` columns into `tags` and empty the catch-all.
///
/// Everything else in `any` is dropped on the floor. Running it twice changes
/// nothing the second time, because there is nothing left in `any`.
pub(crate) fn extract_tags(item: &mut LineItem) {
    for (column, value) in item.any.drain() {
        if let Some(tag) = column.strip_prefix(RESOURCE_TAG_PREFIX) {
            item.tags.insert(tag.to_string(), value);
        }
    }
}
