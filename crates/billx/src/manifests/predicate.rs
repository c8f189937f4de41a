use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::common::Manifest;

/// 🚦 Which manifests a run should ingest.
///
/// The usual answer is "anything modified since the checkpoint", because a
/// billing period is re-exported several times while the month is open and
/// every re-export must be picked up. `None` as the bound means "no
/// checkpoint yet, take everything".
#[derive(Clone)]
pub enum ManifestPredicate {
    ModifiedAfter(Option<DateTime<Utc>>),
    BillingPeriodAfter(Option<DateTime<Utc>>),
    Custom(Arc<dyn Fn(&Manifest) -> bool + Send + Sync>),
}

impl ManifestPredicate {
    pub fn modified_after(checkpoint: Option<DateTime<Utc>>) -> Self {
        Self::ModifiedAfter(checkpoint)
    }

    pub fn billing_period_after(start: Option<DateTime<Utc>>) -> Self {
        Self::BillingPeriodAfter(start)
    }

    pub fn custom(accept: impl Fn(&Manifest) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(accept))
    }

    pub fn accepts(&self, manifest: &Manifest) -> bool {
        match self {
            Self::ModifiedAfter(bound) => bound.is_none_or(|b| manifest.last_modified > b),
            Self::BillingPeriodAfter(bound) => bound.is_none_or(|b| manifest.billing_period.start > b),
            Self::Custom(accept) => accept(manifest),
        }
    }
}

impl fmt::Debug for ManifestPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModifiedAfter(bound) => f.debug_tuple("ModifiedAfter").field(bound).finish(),
            Self::BillingPeriodAfter(bound) => f.debug_tuple("BillingPeriodAfter").field(bound).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}
