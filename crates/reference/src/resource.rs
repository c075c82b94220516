use serde::{Deserialize, Serialize};

use stockroom_core::{DomainResult, Entity, ResourceId};

use crate::entity::{ReferenceEntity, ReferenceKind, ReferenceStatus, normalize_name};

/// A stocked item (e.g. "Steel bolt M8").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    id: ResourceId,
    name: String,
    status: ReferenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDraft {
    pub name: String,
}

impl Resource {
    /// Rebuild a resource from persisted fields (no validation).
    pub fn from_parts(id: ResourceId, name: String, status: ReferenceStatus) -> Self {
        Self { id, name, status }
    }
}

impl Entity for Resource {
    type Id = ResourceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl ReferenceEntity for Resource {
    const KIND: ReferenceKind = ReferenceKind::Resource;

    type Draft = ResourceDraft;

    fn create(id: ResourceId, draft: ResourceDraft) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: normalize_name(&draft.name)?,
            status: ReferenceStatus::Active,
        })
    }

    fn revise(&mut self, draft: ResourceDraft) -> DomainResult<()> {
        self.name = normalize_name(&draft.name)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> ReferenceStatus {
        self.status
    }

    fn set_status(&mut self, status: ReferenceStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::DomainError;

    fn bolts() -> Resource {
        Resource::create(
            ResourceId::new(),
            ResourceDraft {
                name: " Bolts ".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn create_normalizes_name_and_starts_active() {
        let r = bolts();
        assert_eq!(r.name(), "Bolts");
        assert!(r.is_active());
    }

    #[test]
    fn archived_resource_fails_ensure_active() {
        let mut r = bolts();
        r.archive().unwrap();
        match r.ensure_active().unwrap_err() {
            DomainError::Archived(msg) => assert!(msg.contains("Bolts")),
            other => panic!("expected Archived, got {other:?}"),
        }
    }

    #[test]
    fn archive_twice_is_rejected_and_restore_reactivates() {
        let mut r = bolts();
        r.archive().unwrap();
        assert!(matches!(
            r.archive().unwrap_err(),
            DomainError::InvalidTransition(_)
        ));
        r.restore().unwrap();
        assert!(r.is_active());
        assert!(r.restore().is_err());
    }
}
