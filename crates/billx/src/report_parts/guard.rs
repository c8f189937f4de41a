use crate::common::LineItem;

/// 🛡️ What the guard wants done with the row it was just shown.
#[derive(Debug, PartialEq)]
pub(crate) enum GuardVerdict {
    /// ✅ pass it on
    Emit(LineItem),
    /// ⏸️ empty invoice id, held until we know whether it was the last row
    Hold,
    /// 🛑 a held row was followed by another row: the exporter is not done
    Incomplete,
}

/// 🛡️ Detects a report part that is still being written.
///
/// A finished part may end with one row whose `bill/InvoiceId` is empty. The
/// same row anywhere else means the exporter has not filled the invoice in
/// yet. One row of lookahead tells the two apart: the empty-invoice row is
/// held, released at end of stream, and discarded (with everything after it)
/// if another row shows up first.
#[derive(Debug, Default)]
pub(crate) struct IncompleteReportGuard {
    pending: Option<LineItem>,
}

impl IncompleteReportGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_holding(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn observe(&mut self, item: LineItem) -> GuardVerdict {
        if self.pending.is_some() {
            return GuardVerdict::Incomplete;
        }
        if item.invoice_id.is_empty() {
            self.pending = Some(item);
            GuardVerdict::Hold
        } else {
            GuardVerdict::Emit(item)
        }
    }

    /// 🏁 End of stream: a held row turned out to be the last one after all.
    pub(crate) fn finish(self) -> Option<LineItem> {
        self.pending
    }
}
