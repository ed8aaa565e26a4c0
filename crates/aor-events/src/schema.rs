// AOR Events - Schema registry
//
// Channels are typed: a channel can only be created for a `(type, version)`
// pair that was registered beforehand. The failure happens deterministically
// at wiring time, not at first publish.

use aor_core::{AorError, AorResult};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::any::TypeId;
use std::sync::Arc;
use tracing::debug;

/// Decode probe over a serialized payload.
type DecodeProbe = Arc<dyn Fn(&[u8]) -> Result<(), String> + Send + Sync>;

/// Codec installed for a registered `(type, version)` pair.
///
/// Encoding is uniform (serde_json); the codec carries the decode probe the
/// bus runs at delivery time and the Rust type identity used to keep channel
/// handles honest.
#[derive(Clone)]
pub struct SchemaCodec {
    pub type_name: String,
    pub version: u32,
    pub(crate) type_id: TypeId,
    probe: DecodeProbe,
}

impl SchemaCodec {
    /// Check that a payload decodes as the registered type.
    pub fn probe(&self, payload: &[u8]) -> Result<(), String> {
        (self.probe)(payload)
    }
}

impl std::fmt::Debug for SchemaCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCodec")
            .field("type_name", &self.type_name)
            .field("version", &self.version)
            .finish()
    }
}

/// Registry of event schemas keyed by `(type, version)`.
#[derive(Default)]
pub struct SchemaRegistry {
    codecs: DashMap<(String, u32), SchemaCodec>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema. Re-registering the same pair replaces the codec,
    /// so registration is idempotent.
    pub fn register<T: DeserializeOwned + 'static>(&self, type_name: impl Into<String>, version: u32) {
        let type_name = type_name.into();
        debug!(schema = %type_name, version, "registering event schema");
        let probe: DecodeProbe = Arc::new(|payload| {
            serde_json::from_slice::<T>(payload)
                .map(|_| ())
                .map_err(|e| e.to_string())
        });
        self.codecs.insert(
            (type_name.clone(), version),
            SchemaCodec {
                type_name,
                version,
                type_id: TypeId::of::<T>(),
                probe,
            },
        );
    }

    /// Look up the codec for a pair; Configuration error when unregistered.
    pub fn codec(&self, type_name: &str, version: u32) -> AorResult<SchemaCodec> {
        self.codecs
            .get(&(type_name.to_string(), version))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                AorError::config(format!(
                    "event schema '{}' v{} is not registered",
                    type_name, version
                ))
            })
    }

    pub fn is_registered(&self, type_name: &str, version: u32) -> bool {
        self.codecs.contains_key(&(type_name.to_string(), version))
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct OrderPlaced {
        #[allow(dead_code)]
        order_id: String,
    }

    #[test]
    fn test_unregistered_pair_fails() {
        let registry = SchemaRegistry::new();
        let err = registry.codec("OrderPlaced", 1).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_registered_pair_resolves() {
        let registry = SchemaRegistry::new();
        registry.register::<OrderPlaced>("OrderPlaced", 1);
        assert!(registry.is_registered("OrderPlaced", 1));
        assert!(!registry.is_registered("OrderPlaced", 2));

        let codec = registry.codec("OrderPlaced", 1).unwrap();
        assert!(codec.probe(br#"{"order_id": "o-1"}"#).is_ok());
        assert!(codec.probe(b"\x00\x01garbage").is_err());
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let registry = SchemaRegistry::new();
        registry.register::<OrderPlaced>("OrderPlaced", 1);
        registry.register::<OrderPlaced>("OrderPlaced", 1);
        assert_eq!(registry.len(), 1);
    }
}
