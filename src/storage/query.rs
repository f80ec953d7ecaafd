//! Flavor-aware statement building for the handful of shapes the catalog
//! and store migrations need.

use crate::backend::{Flavor, SqlValue};

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// `INSERT INTO table (cols) VALUES (...) ON CONFLICT DO NOTHING`
pub fn insert_ignore(flavor: Flavor, table: &str, columns: &[&str], values: Vec<SqlValue>) -> Statement {
    let placeholders: Vec<String> = (1..=values.len()).map(|i| flavor.placeholder(i)).collect();

    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
            table,
            columns.join(", "),
            placeholders.join(", ")
        ),
        params: values,
    }
}

pub fn select(table: &str, columns: &[&str]) -> Statement {
    Statement {
        sql: format!("SELECT {} FROM {}", columns.join(", "), table),
        params: Vec::new(),
    }
}

pub fn select_where_eq(
    flavor: Flavor,
    table: &str,
    columns: &[&str],
    key: &str,
    value: SqlValue,
) -> Statement {
    Statement {
        sql: format!(
            "SELECT {} FROM {} WHERE {} = {}",
            columns.join(", "),
            table,
            key,
            flavor.placeholder(1)
        ),
        params: vec![value],
    }
}

pub fn delete_where_eq(flavor: Flavor, table: &str, key: &str, value: SqlValue) -> Statement {
    Statement {
        sql: format!("DELETE FROM {} WHERE {} = {}", table, key, flavor.placeholder(1)),
        params: vec![value],
    }
}

/// `CREATE TABLE IF NOT EXISTS table (definition)`
pub fn create_table(table: &str, definition: &str) -> String {
    format!("CREATE TABLE IF NOT EXISTS {} ({})", table, definition)
}
