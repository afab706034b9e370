//! Get-or-create resolution of PCE labels
//!
//! Two callers resolving the same new key/value pair at once end up with the
//! same label: whoever loses the create race gets a `Conflict` from the PCE and
//! re-reads the winner's label.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::BackendError;
use crate::context::LabelSpec;
use crate::error::Error;
use crate::pce::{Label, PceApi};

#[derive(Clone)]
pub struct LabelResolver {
    pce: Arc<dyn PceApi>,
}

impl LabelResolver {
    pub fn new(pce: Arc<dyn PceApi>) -> Self {
        Self { pce }
    }

    /// Existing label with exactly this key and value
    pub async fn find_label(&self, key: &str, value: &str) -> Result<Option<Label>, Error> {
        LabelSpec::new(key, value).validate()?;
        self.pce.find_label(key, value).await.map_err(Error::pce)
    }

    pub async fn get_or_create_label(&self, key: &str, value: &str) -> Result<Label, Error> {
        LabelSpec::new(key, value).validate()?;

        if let Some(label) = self.pce.find_label(key, value).await.map_err(Error::pce)? {
            debug!(key = %key, value = %value, href = %label.href, "Label exists");
            return Ok(label);
        }

        match self.pce.create_label(key, value).await {
            Ok(label) => {
                info!(key = %key, value = %value, href = %label.href, "Created label");
                Ok(label)
            }
            Err(e) if e.is_conflict() => {
                debug!(key = %key, value = %value, "Label created concurrently, re-reading");
                self.pce
                    .find_label(key, value)
                    .await
                    .map_err(Error::pce)?
                    .ok_or_else(|| {
                        Error::BackendRejection(BackendError::NotFound(format!(
                            "label {}={} reported as existing but not found",
                            key, value
                        )))
                    })
            }
            Err(e) => Err(Error::pce(e)),
        }
    }

    /// Resolve every label in order
    pub async fn resolve_all(&self, labels: &[LabelSpec]) -> Result<Vec<Label>, Error> {
        let mut resolved = Vec::with_capacity(labels.len());
        for spec in labels {
            resolved.push(self.get_or_create_label(&spec.key, &spec.value).await?);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakePce;

    #[tokio::test]
    async fn test_creates_missing_label() {
        let pce = Arc::new(FakePce::new());
        let resolver = LabelResolver::new(pce.clone());

        let label = resolver.get_or_create_label("env", "prod").await.unwrap();
        assert_eq!(label.key, "env");
        assert_eq!(pce.label_count(), 1);
        assert_eq!(pce.call_count("create_label"), 1);
    }

    #[tokio::test]
    async fn test_reuses_existing_label() {
        let pce = Arc::new(FakePce::new());
        let existing = pce.seed_label("env", "prod");
        let resolver = LabelResolver::new(pce.clone());

        let label = resolver.get_or_create_label("env", "prod").await.unwrap();
        assert_eq!(label.href, existing.href);
        assert_eq!(pce.call_count("create_label"), 0);
    }

    #[tokio::test]
    async fn test_lost_create_race_rereads() {
        let pce = Arc::new(FakePce::new());
        let existing = pce.seed_label("env", "prod");
        // first lookup misses, as if another writer created it just after
        pce.hide_labels_for_next_finds(1);
        let resolver = LabelResolver::new(pce.clone());

        let label = resolver.get_or_create_label("env", "prod").await.unwrap();
        assert_eq!(label.href, existing.href);
        assert_eq!(pce.call_count("create_label"), 1);
        assert_eq!(pce.label_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_yields_one_label() {
        let pce = Arc::new(FakePce::new());
        let resolver = LabelResolver::new(pce.clone());

        let (a, b) = tokio::join!(
            resolver.get_or_create_label("env", "prod"),
            resolver.get_or_create_label("env", "prod")
        );

        assert_eq!(a.unwrap().href, b.unwrap().href);
        assert_eq!(pce.label_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_label_makes_no_calls() {
        let pce = Arc::new(FakePce::new());
        let resolver = LabelResolver::new(pce.clone());

        let err = resolver.get_or_create_label("env", "prod east").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(pce.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_all_preserves_order() {
        let pce = Arc::new(FakePce::new());
        let resolver = LabelResolver::new(pce.clone());

        let labels = resolver
            .resolve_all(&[LabelSpec::new("env", "prod"), LabelSpec::new("app", "web")])
            .await
            .unwrap();
        assert_eq!(labels[0].key, "env");
        assert_eq!(labels[1].key, "app");
    }
}
