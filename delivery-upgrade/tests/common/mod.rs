//! Shared fixtures: an 8.0 delivery schema in an in-memory SQLite database.

#![allow(dead_code)]

use delivery_upgrade::rusqlite::{Connection, params};
use delivery_upgrade::{MigrationContext, MigrationOptions, MigrationReport, MigrationResult, migrate};

pub const V8_SCHEMA: &str = r#"
CREATE TABLE delivery_carrier (
    id INTEGER PRIMARY KEY,
    name VARCHAR NOT NULL,
    active BOOLEAN DEFAULT TRUE,
    partner_id INTEGER,
    product_id INTEGER
);
CREATE TABLE delivery_grid (
    id INTEGER PRIMARY KEY,
    name VARCHAR NOT NULL,
    sequence INTEGER,
    carrier_id INTEGER REFERENCES delivery_carrier(id) ON DELETE CASCADE,
    active BOOLEAN
);
CREATE TABLE delivery_grid_line (
    id INTEGER PRIMARY KEY,
    name VARCHAR,
    sequence INTEGER DEFAULT 10,
    grid_id INTEGER NOT NULL REFERENCES delivery_grid(id) ON DELETE CASCADE,
    type VARCHAR NOT NULL,
    operator VARCHAR,
    max_value DOUBLE PRECISION,
    price_type VARCHAR NOT NULL,
    variable_factor VARCHAR,
    list_price DOUBLE PRECISION,
    standard_price DOUBLE PRECISION
);
CREATE TABLE res_country (id INTEGER PRIMARY KEY, code VARCHAR(2));
CREATE TABLE res_country_state (id INTEGER PRIMARY KEY, code VARCHAR, country_id INTEGER REFERENCES res_country(id));
CREATE TABLE delivery_grid_country_rel (
    grid_id INTEGER NOT NULL REFERENCES delivery_grid(id) ON DELETE CASCADE,
    country_id INTEGER NOT NULL REFERENCES res_country(id) ON DELETE CASCADE,
    UNIQUE (grid_id, country_id)
);
CREATE INDEX delivery_grid_country_rel_country_id_idx ON delivery_grid_country_rel (country_id);
CREATE TABLE delivery_grid_state_rel (
    grid_id INTEGER NOT NULL REFERENCES delivery_grid(id) ON DELETE CASCADE,
    state_id INTEGER NOT NULL REFERENCES res_country_state(id) ON DELETE CASCADE,
    UNIQUE (grid_id, state_id)
);
CREATE TABLE ir_model_fields (id INTEGER PRIMARY KEY, model VARCHAR NOT NULL, name VARCHAR NOT NULL);
CREATE TABLE ir_model_data (id INTEGER PRIMARY KEY, name VARCHAR, module VARCHAR, model VARCHAR, res_id INTEGER);
CREATE TABLE ir_translation (id INTEGER PRIMARY KEY, name VARCHAR, src VARCHAR, value VARCHAR);
CREATE TABLE ir_property (
    id INTEGER PRIMARY KEY,
    name VARCHAR,
    fields_id INTEGER REFERENCES ir_model_fields(id),
    res_id VARCHAR,
    value_reference VARCHAR
);
CREATE TABLE sale_order (id INTEGER PRIMARY KEY, name VARCHAR, carrier_id INTEGER REFERENCES delivery_carrier(id));
CREATE TABLE stock_picking (id INTEGER PRIMARY KEY, name VARCHAR, carrier_id INTEGER REFERENCES delivery_carrier(id));
CREATE TABLE product_template (id INTEGER PRIMARY KEY, name VARCHAR, type VARCHAR);
CREATE TABLE product_product (id INTEGER PRIMARY KEY, product_tmpl_id INTEGER REFERENCES product_template(id));

INSERT INTO res_country (id, code) VALUES (10, 'US'), (11, 'CA');
INSERT INTO res_country_state (id, code, country_id) VALUES (20, 'NY', 10), (21, 'QC', 11);
INSERT INTO ir_model_fields (id, model, name) VALUES
    (1, 'delivery.grid.line', 'type'),
    (2, 'delivery.grid.line', 'grid_id'),
    (3, 'res.partner', 'property_delivery_carrier');
INSERT INTO ir_model_data (id, name, module, model, res_id) VALUES
    (1, 'field_delivery_grid_line_type', 'delivery', 'ir.model.fields', 1),
    (2, 'field_delivery_grid_line_grid_id', 'delivery', 'ir.model.fields', 2),
    (3, 'field_res_partner_property_delivery_carrier', 'delivery', 'ir.model.fields', 3);
INSERT INTO ir_translation (id, name, src, value) VALUES (1, 'delivery.grid.line,type', 'Variable', 'Variable');
"#;

/// Carrier 7 owns grid 1, carrier 8 owns grids 2 and 3, carrier 9 has no grid.
pub const SCENARIO: &str = r#"
INSERT INTO delivery_carrier (id, name, active) VALUES (7, 'Post', 1), (8, 'Courier', 1), (9, 'Pickup', 1);
INSERT INTO delivery_grid (id, name, sequence, carrier_id, active) VALUES
    (1, 'G1', 1, 7, 1),
    (2, 'G2', 1, 8, 1),
    (3, 'G3', 2, 8, 1);
INSERT INTO delivery_grid_line (id, name, grid_id, type, operator, max_value, price_type, list_price) VALUES
    (1, 'Flat', 1, 'weight', '<=', 10, 'fixed', 12.5),
    (2, 'Per kg', 1, 'weight', '<=', 100, 'variable', 3.0),
    (3, 'Free', 2, 'price', '>=', 50, 'fixed', 0.0),
    (4, 'Per m3', 3, 'volume', '<=', 5, 'variable', 1.5);
INSERT INTO delivery_grid_country_rel (grid_id, country_id) VALUES (1, 10), (2, 10), (3, 11);
INSERT INTO delivery_grid_state_rel (grid_id, state_id) VALUES (1, 20), (3, 21);
INSERT INTO ir_property (id, name, fields_id, res_id, value_reference) VALUES
    (1, 'property_delivery_carrier', 3, 'res.partner,1', 'delivery.carrier,7');
INSERT INTO sale_order (id, name, carrier_id) VALUES (1, 'SO001', 8), (2, 'SO002', 9);
INSERT INTO stock_picking (id, name, carrier_id) VALUES (1, 'OUT/001', 7);
"#;

/// Open an empty 8.0 database with foreign key enforcement off.
pub fn open_v8() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory database");
    conn.pragma_update(None, "foreign_keys", "OFF").expect("disable foreign keys");
    conn.execute_batch(V8_SCHEMA).expect("create 8.0 schema");
    conn
}

/// Open the 8.0 database seeded with [`SCENARIO`].
pub fn open_scenario() -> Connection {
    let conn = open_v8();
    conn.execute_batch(SCENARIO).expect("seed scenario");
    conn
}

/// Run the migration in its own transaction, committing only on success.
pub fn run(conn: &mut Connection, options: MigrationOptions) -> MigrationResult<MigrationReport> {
    let tx = conn.transaction()?;
    let report = {
        let mut ctx = MigrationContext::new(&tx, options)?;
        migrate(&mut ctx, "8.0.1.0")?
    };
    tx.commit()?;
    Ok(report)
}

pub fn table_exists(conn: &Connection, table: &str) -> bool {
    delivery_upgrade::sql::table_exists(conn, table).expect("query sqlite_master")
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    delivery_upgrade::sql::row_count(conn, table).expect("count rows")
}

/// `(id, carrier_id, list_base_price, list_price)` of every price rule.
pub fn price_rules(conn: &Connection) -> Vec<(i64, i64, f64, f64)> {
    let mut stmt = conn
        .prepare("SELECT id, carrier_id, list_base_price, list_price FROM delivery_price_rule ORDER BY id")
        .expect("prepare price rule query");
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
        .expect("query price rules")
        .collect::<Result<Vec<_>, _>>()
        .expect("read price rules")
}

/// `(carrier_id, other_id)` pairs of an association table.
pub fn links(conn: &Connection, table: &str, other: &str) -> Vec<(i64, i64)> {
    let mut stmt = conn
        .prepare(&format!("SELECT carrier_id, {other} FROM {table} ORDER BY carrier_id, {other}"))
        .expect("prepare link query");
    stmt.query_map(params![], |row| Ok((row.get(0)?, row.get(1)?)))
        .expect("query links")
        .collect::<Result<Vec<_>, _>>()
        .expect("read links")
}
