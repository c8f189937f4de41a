//! 🧾 Report parts: the gzipped CSV files a manifest points at.
//!
//! 🎬 *[a part is opened. a header is read. rows start falling out.]*
//! *[somewhere upstream, the exporter is still writing row 40,001.]*
//! *[we are reading row 12. this will become a problem.]*
//!
//! 🧠 Knowledge graph:
//! - [`open_report_part`]: compression check, `GetObject`, streaming gunzip
//! - [`decode_part`]: header → column map → `LineItem`s, one at a time, into a channel
//! - `IncompleteReportGuard`: the empty-`bill/InvoiceId`-before-EOF detector
//! - Each part gets its own `CancellationToken`, a child of the run's. The guard
//!   cancels only that one.

mod decoder;
mod guard;
mod reader;

pub(crate) use decoder::{PartEnd, decode_part};
pub(crate) use reader::open_report_part;

/// 📍 Everything needed to read one part and to complain about it in the logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReportPart {
    pub region: String,
    pub bucket: String,
    pub key: String,
    pub compression: String,
    /// 📜 `reportName@assemblyId` of the owning manifest, for log context
    pub manifest: String,
}
