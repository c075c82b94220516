//! Reference checks run before a document is accepted.

use std::collections::BTreeSet;

use stockroom_core::{DomainError, ResourceId, UnitId};
use stockroom_inventory::DocumentLine;
use stockroom_reference::{ReferenceEntity, Resource, UnitOfMeasure};

use crate::error::CommandError;
use crate::store::{ReferenceRepository, StoreTransaction};

/// Load `id` and require it to be active.
///
/// Fails with `NotFound` for unknown ids and `Archived` for archived ones.
/// The row stays share-locked until the transaction ends, so a concurrent
/// delete or archive waits for the document to commit.
pub async fn require_active<E, T>(tx: &mut T, id: E::Id) -> Result<E, CommandError>
where
    E: ReferenceEntity,
    T: ReferenceRepository<E>,
{
    let entity = tx
        .find_for_share(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("{} {id}", E::KIND)))?;
    entity.ensure_active()?;
    Ok(entity)
}

/// Every resource and unit the lines name must exist and be active.
pub async fn require_line_references<T: StoreTransaction>(
    tx: &mut T,
    lines: &[DocumentLine],
) -> Result<(), CommandError> {
    require_references(tx, lines, |_, _| false).await
}

/// Like [`require_line_references`], but skips references already present on
/// `previous`. A document may keep a line whose resource was archived after
/// the line was written.
pub async fn require_new_line_references<T: StoreTransaction>(
    tx: &mut T,
    previous: &[DocumentLine],
    lines: &[DocumentLine],
) -> Result<(), CommandError> {
    let old_resources: BTreeSet<ResourceId> = previous.iter().map(|l| l.resource_id).collect();
    let old_units: BTreeSet<UnitId> = previous.iter().map(|l| l.unit_id).collect();
    require_references(tx, lines, |resource, unit| match (resource, unit) {
        (Some(id), _) => old_resources.contains(&id),
        (_, Some(id)) => old_units.contains(&id),
        _ => false,
    })
    .await
}

async fn require_references<T, F>(
    tx: &mut T,
    lines: &[DocumentLine],
    known: F,
) -> Result<(), CommandError>
where
    T: StoreTransaction,
    F: Fn(Option<ResourceId>, Option<UnitId>) -> bool,
{
    let resources: BTreeSet<ResourceId> = lines.iter().map(|l| l.resource_id).collect();
    let units: BTreeSet<UnitId> = lines.iter().map(|l| l.unit_id).collect();

    for id in resources {
        if !known(Some(id), None) {
            require_active::<Resource, T>(tx, id).await?;
        }
    }
    for id in units {
        if !known(None, Some(id)) {
            require_active::<UnitOfMeasure, T>(tx, id).await?;
        }
    }
    Ok(())
}
