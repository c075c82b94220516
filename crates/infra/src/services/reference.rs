//! CRUD for resources, units of measure and clients.
//!
//! One implementation serves all three kinds; the entity type supplies its
//! factory and name through [`ReferenceEntity`].

use std::marker::PhantomData;

use tracing::instrument;

use stockroom_core::DomainError;
use stockroom_reference::ReferenceEntity;

use crate::context::CommandContext;
use crate::coordinator::TransactionCoordinator;
use crate::error::CommandError;
use crate::store::{ReferenceRepository, Store};

pub struct ReferenceService<S, E> {
    coordinator: TransactionCoordinator<S>,
    _entity: PhantomData<fn() -> E>,
}

impl<S, E> Clone for ReferenceService<S, E> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            _entity: PhantomData,
        }
    }
}

impl<S, E> ReferenceService<S, E>
where
    S: Store,
    S::Tx: ReferenceRepository<E>,
    E: ReferenceEntity,
    E::Id: Default,
{
    pub fn new(coordinator: TransactionCoordinator<S>) -> Self {
        Self {
            coordinator,
            _entity: PhantomData,
        }
    }

    #[instrument(skip(self, ctx, draft), fields(kind = %E::KIND), err)]
    pub async fn create(&self, ctx: &CommandContext, draft: E::Draft) -> Result<E::Id, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "reference.create").await?;
        let outcome = ctx.guard(create_entity::<E, _>(uow.tx(), draft)).await;
        uow.finish(outcome).await
    }

    /// Rename (and change entity-specific fields). Status is untouched.
    #[instrument(skip(self, ctx, draft), fields(kind = %E::KIND, id = %id), err)]
    pub async fn update(
        &self,
        ctx: &CommandContext,
        id: E::Id,
        draft: E::Draft,
    ) -> Result<(), CommandError> {
        let mut uow = self.coordinator.begin(ctx, "reference.update").await?;
        let outcome = ctx.guard(update_entity::<E, _>(uow.tx(), id, draft)).await;
        uow.finish(outcome).await
    }

    #[instrument(skip(self, ctx), fields(kind = %E::KIND, id = %id), err)]
    pub async fn archive(&self, ctx: &CommandContext, id: E::Id) -> Result<(), CommandError> {
        let mut uow = self.coordinator.begin(ctx, "reference.archive").await?;
        let outcome = ctx
            .guard(change_status::<E, _>(uow.tx(), id, E::archive))
            .await;
        uow.finish(outcome).await
    }

    #[instrument(skip(self, ctx), fields(kind = %E::KIND, id = %id), err)]
    pub async fn restore(&self, ctx: &CommandContext, id: E::Id) -> Result<(), CommandError> {
        let mut uow = self.coordinator.begin(ctx, "reference.restore").await?;
        let outcome = ctx
            .guard(change_status::<E, _>(uow.tx(), id, E::restore))
            .await;
        uow.finish(outcome).await
    }

    /// Delete an entity nothing points at; otherwise fails with `InUse`.
    ///
    /// Waits for documents still being written against the entity.
    #[instrument(skip(self, ctx), fields(kind = %E::KIND, id = %id), err)]
    pub async fn delete(&self, ctx: &CommandContext, id: E::Id) -> Result<(), CommandError> {
        let mut uow = self.coordinator.begin(ctx, "reference.delete").await?;
        let outcome = ctx.guard(delete_entity::<E, _>(uow.tx(), id)).await;
        uow.finish(outcome).await
    }

    pub async fn get(&self, ctx: &CommandContext, id: E::Id) -> Result<E, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "reference.get").await?;
        let outcome = ctx.guard(find_existing::<E, _>(uow.tx(), id)).await;
        uow.close(outcome).await
    }

    pub async fn list(
        &self,
        ctx: &CommandContext,
        include_archived: bool,
    ) -> Result<Vec<E>, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "reference.list").await?;
        let outcome = ctx
            .guard(list_entities::<E, _>(uow.tx(), include_archived))
            .await;
        uow.close(outcome).await
    }
}

async fn create_entity<E, T>(tx: &mut T, draft: E::Draft) -> Result<E::Id, CommandError>
where
    E: ReferenceEntity,
    E::Id: Default,
    T: ReferenceRepository<E>,
{
    let entity = E::create(E::Id::default(), draft)?;
    ensure_name_free(tx, &entity).await?;
    tx.insert(&entity).await?;
    Ok(*entity.id())
}

async fn update_entity<E, T>(tx: &mut T, id: E::Id, draft: E::Draft) -> Result<(), CommandError>
where
    E: ReferenceEntity,
    T: ReferenceRepository<E>,
{
    let mut entity = lock_existing::<E, T>(tx, id).await?;
    entity.revise(draft)?;
    ensure_name_free(tx, &entity).await?;
    tx.update(&entity).await?;
    Ok(())
}

async fn change_status<E, T>(
    tx: &mut T,
    id: E::Id,
    change: fn(&mut E) -> Result<(), DomainError>,
) -> Result<(), CommandError>
where
    E: ReferenceEntity,
    T: ReferenceRepository<E>,
{
    let mut entity = lock_existing::<E, T>(tx, id).await?;
    change(&mut entity)?;
    tx.update(&entity).await?;
    Ok(())
}

async fn delete_entity<E, T>(tx: &mut T, id: E::Id) -> Result<(), CommandError>
where
    E: ReferenceEntity,
    T: ReferenceRepository<E>,
{
    let entity = lock_existing::<E, T>(tx, id).await?;
    if tx.is_referenced(id).await? {
        return Err(DomainError::in_use(format!(
            "{} '{}' is used by documents or balances; archive it instead",
            E::KIND,
            entity.name()
        ))
        .into());
    }
    tx.delete(id).await?;
    Ok(())
}

async fn list_entities<E, T>(tx: &mut T, include_archived: bool) -> Result<Vec<E>, CommandError>
where
    E: ReferenceEntity,
    T: ReferenceRepository<E>,
{
    Ok(tx.list(include_archived).await?)
}

async fn find_existing<E, T>(tx: &mut T, id: E::Id) -> Result<E, CommandError>
where
    E: ReferenceEntity,
    T: ReferenceRepository<E>,
{
    tx.find(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("{} {id}", E::KIND)).into())
}

/// Like [`find_existing`], holding the row exclusively until commit.
async fn lock_existing<E, T>(tx: &mut T, id: E::Id) -> Result<E, CommandError>
where
    E: ReferenceEntity,
    T: ReferenceRepository<E>,
{
    tx.find_for_update(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("{} {id}", E::KIND)).into())
}

async fn ensure_name_free<E, T>(tx: &mut T, entity: &E) -> Result<(), CommandError>
where
    E: ReferenceEntity,
    T: ReferenceRepository<E>,
{
    match tx.find_by_name(entity.name()).await? {
        Some(existing) if existing.id() != entity.id() => Err(DomainError::duplicate_name(
            format!("{} '{}'", E::KIND, entity.name()),
        )
        .into()),
        _ => Ok(()),
    }
}
