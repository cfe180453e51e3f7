//! Declarative transformation tables for the delivery 8.0 → 9.0 upgrade.
//!
//! Pure data. The executor in [`crate::delivery`] feeds these to the helpers in
//! [`crate::upgrade`] in a fixed order.

use serde::Serialize;

use crate::upgrade::{ColumnAddition, ColumnCopy, ColumnRename, FieldRename, PropertyRename, TableRename};

pub const CARRIER_TABLE: &str = "delivery_carrier";
pub const GRID_TABLE: &str = "delivery_grid";
pub const RULE_TABLE: &str = "delivery_grid_line";
pub const COUNTRY_REL_TABLE: &str = "delivery_grid_country_rel";
pub const STATE_REL_TABLE: &str = "delivery_grid_state_rel";

/// Column on the dependent tables that names the grid before the upgrade.
pub const GRID_COLUMN: &str = "grid_id";
/// Column on the dependent tables that names the carrier after the upgrade.
pub const CARRIER_COLUMN: &str = "carrier_id";

/// Tables whose grid reference is repointed at the owning carrier.
pub const GRID_DEPENDENT_TABLES: &[&str] = &[RULE_TABLE, COUNTRY_REL_TABLE, STATE_REL_TABLE];

/// Dependent tables that are many-to-many links; fan-in may produce duplicates there.
pub const ASSOCIATION_TABLES: &[&str] = &[COUNTRY_REL_TABLE, STATE_REL_TABLE];

/// Grid ids kept under their legacy name before any rename.
pub const GRID_LINKAGE_COPIES: &[ColumnCopy] = &[
    ColumnCopy { table: RULE_TABLE, source: GRID_COLUMN, target: None, column_type: None },
    ColumnCopy { table: COUNTRY_REL_TABLE, source: GRID_COLUMN, target: None, column_type: None },
    ColumnCopy { table: STATE_REL_TABLE, source: GRID_COLUMN, target: None, column_type: None },
];

pub const COLUMN_RENAMES: &[ColumnRename] = &[
    ColumnRename { table: RULE_TABLE, old: "price_type", new: None },
    ColumnRename { table: COUNTRY_REL_TABLE, old: GRID_COLUMN, new: Some(CARRIER_COLUMN) },
    ColumnRename { table: STATE_REL_TABLE, old: GRID_COLUMN, new: Some(CARRIER_COLUMN) },
];

pub const FIELD_RENAMES: &[FieldRename] = &[
    FieldRename { model: "delivery.grid.line", table: RULE_TABLE, old: "type", new: "variable" },
    FieldRename { model: "delivery.grid.line", table: RULE_TABLE, old: GRID_COLUMN, new: CARRIER_COLUMN },
];

/// Retired discriminator of the rule price, read through its legacy name.
pub const PRICE_TYPE_COLUMN: &str = "price_type";
/// Variable amount; also the single amount in the legacy shape.
pub const VARIABLE_PRICE_COLUMN: &str = "list_price";
/// Fixed amount, new in 9.0.
pub const FIXED_PRICE_COLUMN: &str = "list_base_price";

pub const RULE_PRICE_COPIES: &[ColumnCopy] = &[ColumnCopy {
    table: RULE_TABLE,
    source: VARIABLE_PRICE_COLUMN,
    target: Some(FIXED_PRICE_COLUMN),
    column_type: None,
}];

pub const CARRIER_FIELDS: &[ColumnAddition] = &[
    ColumnAddition { name: "delivery_type", column_type: "VARCHAR", default: Some("'fixed'"), required: true },
    ColumnAddition { name: "fixed_price", column_type: "DOUBLE PRECISION", default: Some("0.0"), required: false },
    ColumnAddition { name: "zip_to", column_type: "VARCHAR", default: None, required: false },
    ColumnAddition { name: "sequence", column_type: "INTEGER", default: Some("10"), required: false },
    ColumnAddition { name: "shipping_enabled", column_type: "BOOLEAN", default: Some("TRUE"), required: false },
    ColumnAddition { name: "zip_from", column_type: "VARCHAR", default: None, required: false },
];

/// `None` keeps the grid table around under its legacy name.
pub const TABLE_RENAMES: &[TableRename] = &[
    TableRename { old: GRID_TABLE, new: None },
    TableRename { old: RULE_TABLE, new: Some("delivery_price_rule") },
    TableRename { old: COUNTRY_REL_TABLE, new: Some("delivery_carrier_country_rel") },
    TableRename { old: STATE_REL_TABLE, new: Some("delivery_carrier_state_rel") },
];

pub const PROPERTY_RENAME: PropertyRename = PropertyRename {
    model: "res.partner",
    old: "property_delivery_carrier",
    new: "property_delivery_carrier_id",
};

/// Tables whose carrier reference the opt-in order correction repoints.
pub const ORDER_REFERENCE_TABLES: &[&str] = &["sale_order", "stock_picking"];

/// All transformation tables, for display and checksumming.
#[derive(Debug, Clone, Serialize)]
pub struct PlanTables {
    pub grid_linkage_copies: &'static [ColumnCopy],
    pub column_renames: &'static [ColumnRename],
    pub field_renames: &'static [FieldRename],
    pub carrier_fields: &'static [ColumnAddition],
    pub rule_price_copies: &'static [ColumnCopy],
    pub table_renames: &'static [TableRename],
    pub property_rename: PropertyRename,
}

pub fn plan_tables() -> PlanTables {
    PlanTables {
        grid_linkage_copies: GRID_LINKAGE_COPIES,
        column_renames: COLUMN_RENAMES,
        field_renames: FIELD_RENAMES,
        carrier_fields: CARRIER_FIELDS,
        rule_price_copies: RULE_PRICE_COPIES,
        table_renames: TABLE_RENAMES,
        property_rename: PROPERTY_RENAME,
    }
}
