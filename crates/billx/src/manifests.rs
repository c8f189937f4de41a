//! 📜 Manifests: finding them, fetching them, deciding whether we care.
//!
//! A billing export is a directory per billing period (`20230101-20230201/`)
//! holding a `<report>-Manifest.json` and a pile of gzipped CSV parts. The
//! manifest is the table of contents. Everything downstream keys off it.
//!
//! 🧠 Knowledge graph:
//! - [`is_manifest_key`]: pure path test, no I/O
//! - [`download_manifest`]: bounded download, parsed afterwards by [`Manifest::from_slice`](crate::common::Manifest::from_slice)
//! - [`ManifestPredicate`]: the caller's "have we seen this one already?"

mod fetcher;
mod key_filter;
mod predicate;

pub(crate) use fetcher::download_manifest;
pub use key_filter::is_manifest_key;
pub use predicate::ManifestPredicate;
