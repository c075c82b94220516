use serde::{Deserialize, Serialize};

use stockroom_core::{DomainResult, Entity, UnitId};

use crate::entity::{ReferenceEntity, ReferenceKind, ReferenceStatus, normalize_name};

/// Unit of measure a resource is counted in (e.g. "kg", "box of 100").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfMeasure {
    id: UnitId,
    name: String,
    status: ReferenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDraft {
    pub name: String,
}

impl UnitOfMeasure {
    /// Rebuild a unit from persisted fields (no validation).
    pub fn from_parts(id: UnitId, name: String, status: ReferenceStatus) -> Self {
        Self { id, name, status }
    }
}

impl Entity for UnitOfMeasure {
    type Id = UnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl ReferenceEntity for UnitOfMeasure {
    const KIND: ReferenceKind = ReferenceKind::UnitOfMeasure;

    type Draft = UnitDraft;

    fn create(id: UnitId, draft: UnitDraft) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: normalize_name(&draft.name)?,
            status: ReferenceStatus::Active,
        })
    }

    fn revise(&mut self, draft: UnitDraft) -> DomainResult<()> {
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
