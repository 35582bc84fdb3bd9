//! Tracked instrument set.
//!
//! Mutable at runtime via administrative add/remove; runs consume immutable
//! snapshots, so structural changes during a run never affect that run.

use signal_domain::{Instrument, RegistryError};
use tokio::sync::RwLock;
use tracing::info;

/// Insertion-ordered instrument set. Identifiers are unique; snapshot order
/// is insertion order, which makes report ordering reproducible across runs
/// with the same registry state.
#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    inner: RwLock<Vec<Instrument>>,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry from a config-provided list, rejecting duplicates.
    pub fn with_instruments(
        instruments: impl IntoIterator<Item = Instrument>,
    ) -> Result<Self, RegistryError> {
        let mut seen: Vec<Instrument> = Vec::new();
        for instrument in instruments {
            if seen.iter().any(|i| i.id == instrument.id) {
                return Err(RegistryError::DuplicateInstrument(instrument.id));
            }
            seen.push(instrument);
        }
        Ok(Self {
            inner: RwLock::new(seen),
        })
    }

    pub async fn add(&self, instrument: Instrument) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.iter().any(|i| i.id == instrument.id) {
            return Err(RegistryError::DuplicateInstrument(instrument.id));
        }
        info!(instrument_id = %instrument.id, "instrument registered");
        inner.push(instrument);
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<Instrument, RegistryError> {
        let mut inner = self.inner.write().await;
        let position = inner
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        info!(instrument_id = %id, "instrument removed");
        Ok(inner.remove(position))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.iter().any(|i| i.id == id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Immutable point-in-time copy in insertion order, consumed by exactly
    /// one run.
    pub async fn snapshot(&self) -> Vec<Instrument> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_and_snapshot_preserve_insertion_order() {
        let registry = InstrumentRegistry::new();
        for id in ["AAPL", "MSFT", "NVDA"] {
            registry.add(Instrument::new(id)).await.unwrap();
        }

        let snapshot = registry.snapshot().await;
        let ids: Vec<&str> = snapshot.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["AAPL", "MSFT", "NVDA"]);
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let registry = InstrumentRegistry::new();
        registry.add(Instrument::new("AAPL")).await.unwrap();

        let err = registry.add(Instrument::new("AAPL")).await.unwrap_err();
        assert_eq!(err, RegistryError::DuplicateInstrument("AAPL".into()));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_missing_rejected() {
        let registry = InstrumentRegistry::new();
        let err = registry.remove("AAPL").await.unwrap_err();
        assert_eq!(err, RegistryError::NotFound("AAPL".into()));
    }

    #[tokio::test]
    async fn test_snapshot_unaffected_by_later_mutation() {
        let registry = InstrumentRegistry::new();
        registry.add(Instrument::new("AAPL")).await.unwrap();
        registry.add(Instrument::new("MSFT")).await.unwrap();

        let snapshot = registry.snapshot().await;
        registry.remove("AAPL").await.unwrap();
        registry.add(Instrument::new("NVDA")).await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "AAPL");
        assert_eq!(snapshot[1].id, "MSFT");
    }

    #[tokio::test]
    async fn test_with_instruments_rejects_duplicates() {
        let result = InstrumentRegistry::with_instruments(vec![
            Instrument::new("AAPL"),
            Instrument::new("AAPL"),
        ]);
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateInstrument(id)) if id == "AAPL"
        ));
    }

    #[tokio::test]
    async fn test_remove_keeps_relative_order() {
        let registry = InstrumentRegistry::with_instruments(vec![
            Instrument::new("AAPL"),
            Instrument::new("MSFT"),
            Instrument::new("NVDA"),
        ])
        .unwrap();

        registry.remove("MSFT").await.unwrap();
        let ids: Vec<String> = registry.snapshot().await.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["AAPL", "NVDA"]);
    }
}
