//! Delivery 8.0 → 9.0 upgrade.
//!
//! The grid concept is folded into the carrier: price rules and the
//! country/state links are repointed from grid ids to the ids of the carriers
//! owning those grids, the carrier gains its 9.0 columns, and the rule's tagged
//! price becomes two plain amounts.
//!
//! Steps run in a fixed order inside the caller's transaction. They are not
//! individually idempotent; a failed or repeated run must be recovered from a
//! backup.

mod carrier;
mod grid;
mod prices;
mod recovery;

use std::fmt;

use log::info;
use serde::Serialize;

use crate::context::MigrationContext;
use crate::errors::{MigrationError, MigrationResult};
use crate::plan::{COLUMN_RENAMES, FIELD_RENAMES, GRID_LINKAGE_COPIES, PROPERTY_RENAME, TABLE_RENAMES};
use crate::upgrade::{copy_columns, rename_columns, rename_fields, rename_property, rename_tables};

pub use carrier::add_fields_to_delivery_carrier;
pub use grid::{GridRemap, correct_grid_references, load_grid_mapping, verify_mapping_covers};
pub use prices::correct_rule_prices;
pub use recovery::{correct_order_references, create_carrier_products, fill_missing_grids};

/// Name of this migration in the applied-migration ledger.
pub const MIGRATION_NAME: &str = "delivery_9_0_1_0_pre";

/// One step of the upgrade, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    PreserveGridLinkage,
    FillMissingGrids,
    CreateCarrierProducts,
    CorrectOrderReferences,
    RenameColumns,
    RenameFields,
    RemapGridReferences,
    AddCarrierFields,
    SplitRulePrices,
    RenameTables,
    RenameProperty,
}

impl Step {
    pub const ALL: [Step; 11] = [
        Step::PreserveGridLinkage,
        Step::FillMissingGrids,
        Step::CreateCarrierProducts,
        Step::CorrectOrderReferences,
        Step::RenameColumns,
        Step::RenameFields,
        Step::RemapGridReferences,
        Step::AddCarrierFields,
        Step::SplitRulePrices,
        Step::RenameTables,
        Step::RenameProperty,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::PreserveGridLinkage => "preserve grid linkage",
            Step::FillMissingGrids => "fill missing grids",
            Step::CreateCarrierProducts => "create carrier products",
            Step::CorrectOrderReferences => "correct order references",
            Step::RenameColumns => "rename columns",
            Step::RenameFields => "rename fields",
            Step::RemapGridReferences => "remap grid references",
            Step::AddCarrierFields => "add carrier fields",
            Step::SplitRulePrices => "split rule prices",
            Step::RenameTables => "rename tables",
            Step::RenameProperty => "rename property",
        }
    }

    /// Opt-in steps for databases with missing or inconsistent data.
    pub fn is_recovery(&self) -> bool {
        matches!(
            self,
            Step::FillMissingGrids | Step::CreateCarrierProducts | Step::CorrectOrderReferences
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from_version: String,
    pub steps: Vec<Step>,
    pub grids_created: u64,
    pub products_created: usize,
    pub order_references_corrected: u64,
    pub grids_mapped: usize,
    pub rows_remapped: u64,
    pub duplicates_collapsed: u64,
    /// Rows touched by all logged data statements.
    pub rows_affected: u64,
}

/// Run the upgrade inside the transaction held by `ctx`.
///
/// The caller commits when this returns `Ok` and discards the transaction
/// otherwise. `from_version` is only logged.
pub fn migrate(ctx: &mut MigrationContext<'_>, from_version: &str) -> MigrationResult<MigrationReport> {
    info!("upgrading delivery from version {from_version}");
    let recovery = ctx.options().recovery;
    let mut report = MigrationReport {
        from_version: from_version.to_string(),
        ..Default::default()
    };

    run_step(ctx, &mut report, Step::PreserveGridLinkage, |ctx| {
        copy_columns(ctx, GRID_LINKAGE_COPIES)
    })?;

    if recovery.fill_missing_grids {
        report.grids_created = run_step(ctx, &mut report, Step::FillMissingGrids, fill_missing_grids)?;
    }
    if recovery.create_carrier_products {
        report.products_created =
            run_step(ctx, &mut report, Step::CreateCarrierProducts, create_carrier_products)?;
    }
    if recovery.correct_order_references {
        report.order_references_corrected =
            run_step(ctx, &mut report, Step::CorrectOrderReferences, correct_order_references)?;
    }

    run_step(ctx, &mut report, Step::RenameColumns, |ctx| rename_columns(ctx, COLUMN_RENAMES))?;
    run_step(ctx, &mut report, Step::RenameFields, |ctx| rename_fields(ctx, FIELD_RENAMES))?;

    let remap = run_step(ctx, &mut report, Step::RemapGridReferences, correct_grid_references)?;
    report.grids_mapped = remap.mapping.len();
    report.rows_remapped = remap.rows_remapped;
    report.duplicates_collapsed = remap.duplicates_collapsed;

    run_step(ctx, &mut report, Step::AddCarrierFields, add_fields_to_delivery_carrier)?;
    run_step(ctx, &mut report, Step::SplitRulePrices, correct_rule_prices)?;
    run_step(ctx, &mut report, Step::RenameTables, |ctx| rename_tables(ctx, TABLE_RENAMES))?;
    run_step(ctx, &mut report, Step::RenameProperty, |ctx| {
        rename_property(ctx, &PROPERTY_RENAME).map(|_| ())
    })?;

    report.rows_affected = ctx.rows_affected();
    info!(
        "delivery upgrade done: {} grid(s) mapped, {} row(s) remapped, {} row(s) affected",
        report.grids_mapped, report.rows_remapped, report.rows_affected
    );
    Ok(report)
}

fn run_step<'a, T>(
    ctx: &mut MigrationContext<'a>,
    report: &mut MigrationReport,
    step: Step,
    action: impl FnOnce(&mut MigrationContext<'a>) -> MigrationResult<T>,
) -> MigrationResult<T> {
    info!("step: {step}");
    let output = action(ctx).map_err(|source| MigrationError::Step {
        step,
        source: Box::new(source),
    })?;
    report.steps.push(step);
    Ok(output)
}
