mod catalog;
mod ledger;
mod modifier;

pub use catalog::{
    PrerequisiteEdge, StructureCatalog, StructureDefinition, StructureInstance, StructureType,
    UpgradeBlocked,
};
pub use ledger::{Deposit, ResourceKind, ResourceLedger, Withdrawal};
pub use modifier::{
    calculate_modifier_value, round_value, ModifierKind, ModifierSpec, ModifierTotals,
    ResolvedModifier, Scaling, ROUNDING_DECIMALS,
};
