use serde::{Deserialize, Serialize};

use stockroom_core::{ClientId, DomainResult, Entity};

use crate::entity::{ReferenceEntity, ReferenceKind, ReferenceStatus, normalize_name};

/// Recipient of shipments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    id: ClientId,
    name: String,
    address: String,
    status: ReferenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDraft {
    pub name: String,
    pub address: String,
}

impl Client {
    /// Rebuild a client from persisted fields (no validation).
    pub fn from_parts(id: ClientId, name: String, address: String, status: ReferenceStatus) -> Self {
        Self {
            id,
            name,
            address,
            status,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Entity for Client {
    type Id = ClientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl ReferenceEntity for Client {
    const KIND: ReferenceKind = ReferenceKind::Client;

    type Draft = ClientDraft;

    fn create(id: ClientId, draft: ClientDraft) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: normalize_name(&draft.name)?,
            address: draft.address.trim().to_string(),
            status: ReferenceStatus::Active,
        })
    }

    fn revise(&mut self, draft: ClientDraft) -> DomainResult<()> {
        self.name = normalize_name(&draft.name)?;
        self.address = draft.address.trim().to_string();
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
