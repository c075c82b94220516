use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, Entity};

/// Maximum length of a reference entity name, in characters.
pub const MAX_NAME_LEN: usize = 200;

/// Which reference table an entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Resource,
    UnitOfMeasure,
    Client,
}

impl ReferenceKind {
    pub fn label(self) -> &'static str {
        match self {
            ReferenceKind::Resource => "resource",
            ReferenceKind::UnitOfMeasure => "unit of measure",
            ReferenceKind::Client => "client",
        }
    }
}

impl core::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Reference entity status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceStatus {
    Active,
    Archived,
}

/// Capability shared by every named, archivable reference entity.
///
/// Implementors provide the factory (`create`), the edit path (`revise`) and
/// access to name and status. Archive/restore and the "usable in a new
/// document" check are provided once here.
pub trait ReferenceEntity:
    Entity<Id: Copy + Ord + core::fmt::Display + Send + Sync + 'static>
    + Clone
    + core::fmt::Debug
    + Send
    + Sync
    + 'static
{
    const KIND: ReferenceKind;

    /// Input accepted when creating or editing the entity.
    type Draft: Clone + core::fmt::Debug + Send + Sync;

    fn create(id: Self::Id, draft: Self::Draft) -> DomainResult<Self>;

    fn revise(&mut self, draft: Self::Draft) -> DomainResult<()>;

    /// Uniqueness key within the entity's kind.
    fn name(&self) -> &str;

    fn status(&self) -> ReferenceStatus;

    fn set_status(&mut self, status: ReferenceStatus);

    fn is_active(&self) -> bool {
        self.status() == ReferenceStatus::Active
    }

    fn archive(&mut self) -> DomainResult<()> {
        if !self.is_active() {
            return Err(DomainError::invalid_transition(format!(
                "{} '{}' is already archived",
                Self::KIND,
                self.name()
            )));
        }
        self.set_status(ReferenceStatus::Archived);
        Ok(())
    }

    fn restore(&mut self) -> DomainResult<()> {
        if self.is_active() {
            return Err(DomainError::invalid_transition(format!(
                "{} '{}' is not archived",
                Self::KIND,
                self.name()
            )));
        }
        self.set_status(ReferenceStatus::Active);
        Ok(())
    }

    /// Fails with `Archived` unless the entity may be used on a document.
    fn ensure_active(&self) -> DomainResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DomainError::archived(format!(
                "{} '{}' is archived",
                Self::KIND,
                self.name()
            )))
        }
    }
}

/// Trim and validate a reference entity name.
pub fn normalize_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_whitespace() {
        assert_eq!(normalize_name("  Bolts \n").unwrap(), "Bolts");
    }

    #[test]
    fn normalize_rejects_blank_and_overlong() {
        assert!(normalize_name("   ").is_err());
        assert!(normalize_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(normalize_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
    }
}
