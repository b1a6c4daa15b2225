//! Registry of all entities known to an orchestrator.

use crate::entity::{EntityKind, EntityRecord};
use crate::error::{IdentityError, IdentityResult};
use std::collections::HashMap;
use tracing::debug;

/// Entities keyed by id, remembering registration order.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, EntityRecord>,
    order: Vec<String>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: EntityRecord) -> IdentityResult<()> {
        if self.entities.contains_key(&record.id) {
            return Err(IdentityError::EntityExists { id: record.id });
        }
        debug!(id = %record.id, kind = %record.kind, "Entity registered");
        self.order.push(record.id.clone());
        self.entities.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// Look up an entity of any kind.
    pub fn find(&self, id: &str) -> Option<&EntityRecord> {
        self.entities.get(id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut EntityRecord> {
        self.entities.get_mut(id)
    }

    /// Look up an entity that must be of `kind`.
    pub fn get(&self, kind: EntityKind, id: &str) -> IdentityResult<&EntityRecord> {
        self.entities
            .get(id)
            .filter(|record| record.kind == kind)
            .ok_or_else(|| IdentityError::EntityNotFound {
                kind,
                id: id.to_string(),
            })
    }

    pub fn get_mut(&mut self, kind: EntityKind, id: &str) -> IdentityResult<&mut EntityRecord> {
        self.entities
            .get_mut(id)
            .filter(|record| record.kind == kind)
            .ok_or_else(|| IdentityError::EntityNotFound {
                kind,
                id: id.to_string(),
            })
    }

    /// Ids of `kind` in registration order.
    pub fn ids(&self, kind: EntityKind) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.entities.get(*id).is_some_and(|r| r.kind == kind))
            .cloned()
            .collect()
    }

    /// First registered entity of `kind`.
    pub fn first(&self, kind: EntityKind) -> Option<&EntityRecord> {
        self.order
            .iter()
            .filter_map(|id| self.entities.get(id))
            .find(|record| record.kind == kind)
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.entities.values().filter(|r| r.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltmesh_core::PufConfig;
    use voltmesh_crypto::SignatureScheme;

    fn record(kind: EntityKind, id: &str) -> EntityRecord {
        EntityRecord::new(
            kind,
            Some(id),
            SignatureScheme::new(1).unwrap(),
            &PufConfig::default(),
            50.0,
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut registry = EntityRegistry::new();
        registry.insert(record(EntityKind::EdgeNode, "EN-1")).unwrap();

        assert!(registry.get(EntityKind::EdgeNode, "EN-1").is_ok());
        assert!(registry.find("EN-1").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = EntityRegistry::new();
        registry.insert(record(EntityKind::EdgeNode, "X")).unwrap();

        let result = registry.insert(record(EntityKind::ChargingStation, "X"));

        assert!(matches!(result, Err(IdentityError::EntityExists { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_kind_mismatch_is_not_found() {
        let mut registry = EntityRegistry::new();
        registry.insert(record(EntityKind::EdgeNode, "EN-1")).unwrap();

        let err = registry
            .get(EntityKind::ChargingStation, "EN-1")
            .unwrap_err();

        assert_eq!(err.to_string(), "CS not found: EN-1");
    }

    #[test]
    fn test_registration_order() {
        let mut registry = EntityRegistry::new();
        registry.insert(record(EntityKind::EdgeNode, "EN-b")).unwrap();
        registry.insert(record(EntityKind::ElectricVehicle, "EV-1")).unwrap();
        registry.insert(record(EntityKind::EdgeNode, "EN-a")).unwrap();

        assert_eq!(registry.ids(EntityKind::EdgeNode), vec!["EN-b", "EN-a"]);
        assert_eq!(registry.first(EntityKind::EdgeNode).unwrap().id, "EN-b");
        assert_eq!(registry.count(EntityKind::EdgeNode), 2);
        assert!(registry.first(EntityKind::ServiceProvider).is_none());
    }
}
