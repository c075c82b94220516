use crate::batch::DeltaBatch;

/// What a document event asks of the balance ledger.
///
/// `Increase`, `Decrease` and `CheckAvailability` carry positive amounts;
/// `Adjust` carries signed deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEffect {
    /// The event does not touch balances.
    None,
    Increase(DeltaBatch),
    /// Binding decrease: fails as a whole if any key is short.
    Decrease(DeltaBatch),
    /// Signed deltas; negative keys are validated like a decrease.
    Adjust(DeltaBatch),
    /// Read-only sufficiency check; nothing is reserved or mutated.
    CheckAvailability(DeltaBatch),
}

impl LedgerEffect {
    pub fn is_none(&self) -> bool {
        matches!(self, LedgerEffect::None)
    }

    /// True if applying this effect mutates balances.
    pub fn mutates(&self) -> bool {
        matches!(
            self,
            LedgerEffect::Increase(_) | LedgerEffect::Decrease(_) | LedgerEffect::Adjust(_)
        )
    }
}
