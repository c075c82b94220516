use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, LineId, Quantity, ResourceId, UnitId};

use crate::balance::BalanceKey;
use crate::batch::DeltaBatch;

/// One line of a receipt or shipment document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub line_id: LineId,
    pub resource_id: ResourceId,
    pub unit_id: UnitId,
    pub quantity: Quantity,
}

impl DocumentLine {
    pub fn new(resource_id: ResourceId, unit_id: UnitId, quantity: Quantity) -> Self {
        Self {
            line_id: LineId::new(),
            resource_id,
            unit_id,
            quantity,
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.resource_id, self.unit_id)
    }
}

/// Reject line sets that reuse a line id.
pub fn ensure_unique_line_ids(lines: &[DocumentLine]) -> DomainResult<()> {
    let mut seen = HashSet::with_capacity(lines.len());
    for line in lines {
        if !seen.insert(line.line_id) {
            return Err(DomainError::validation(format!(
                "duplicate line id {}",
                line.line_id
            )));
        }
    }
    Ok(())
}

/// Keyed quantities of a line set, as fed to [`DeltaBatch`].
pub fn keyed_quantities(lines: &[DocumentLine]) -> impl Iterator<Item = (BalanceKey, Quantity)> + '_ {
    lines.iter().map(|l| (l.key(), l.quantity))
}

impl DeltaBatch {
    /// One positive delta per document line (same-key lines are summed).
    pub fn from_document_lines(lines: &[DocumentLine]) -> Self {
        Self::from_lines(keyed_quantities(lines))
    }
}
