//! Target table definitions and the DDL each store dialect needs for them.

use serde::Serialize;
use std::fmt;

/// Logical column type, used both for DDL and for coercing staged CSV cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Timestamp,
}

/// SQL flavour spoken by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "postgres"),
        }
    }
}

impl ColumnType {
    fn sql(&self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (ColumnType::Integer, _) => "INTEGER",
            (ColumnType::Real, Dialect::Sqlite) => "REAL",
            (ColumnType::Real, Dialect::Postgres) => "DOUBLE PRECISION",
            (ColumnType::Text, _) => "TEXT",
            (ColumnType::Timestamp, Dialect::Sqlite) => "TEXT",
            (ColumnType::Timestamp, Dialect::Postgres) => "TIMESTAMP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
}

const fn col(name: &'static str, kind: ColumnType) -> Column {
    Column { name, kind }
}

/// A target table. Every table also gets a surrogate `id` primary key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for the given dialect.
    pub fn create_sql(&self, dialect: Dialect) -> String {
        let id = match dialect {
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
        };
        let mut lines = vec![format!("    {id}")];
        lines.extend(
            self.columns
                .iter()
                .map(|c| format!("    {} {}", c.name, c.kind.sql(dialect))),
        );
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
            self.name,
            lines.join(",\n")
        )
    }

    pub fn air_quality() -> Self {
        use ColumnType::*;
        Self {
            name: "air_quality_data",
            columns: vec![
                col("city", Text),
                col("time", Timestamp),
                col("pm10", Real),
                col("pm2_5", Real),
                col("carbon_monoxide", Real),
                col("nitrogen_dioxide", Real),
                col("sulphur_dioxide", Real),
                col("ozone", Real),
                col("uv_index", Real),
                col("aqi_category", Text),
                col("severity_score", Real),
                col("risk_flag", Text),
                col("hour", Integer),
            ],
        }
    }

    pub fn churn() -> Self {
        use ColumnType::*;
        Self {
            name: "churn_data",
            columns: vec![
                col("tenure", Integer),
                col("monthlycharges", Real),
                col("totalcharges", Real),
                col("churn", Text),
                col("internetservice", Text),
                col("contract", Text),
                col("paymentmethod", Text),
                col("tenure_group", Text),
                col("monthly_charge_segment", Text),
                col("has_internet_service", Integer),
                col("is_multi_line_user", Integer),
                col("contract_type_code", Integer),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_ddl() {
        let sql = TableSchema::air_quality().create_sql(Dialect::Sqlite);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS air_quality_data ("));
        assert!(sql.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("    time TEXT"));
        assert!(sql.contains("    pm2_5 REAL"));
        assert!(sql.ends_with(");"));
    }

    #[test]
    fn test_postgres_ddl() {
        let sql = TableSchema::air_quality().create_sql(Dialect::Postgres);
        assert!(sql.contains("id BIGSERIAL PRIMARY KEY"));
        assert!(sql.contains("    time TIMESTAMP"));
        assert!(sql.contains("    severity_score DOUBLE PRECISION"));
        assert!(sql.contains("    hour INTEGER\n);"));
    }

    #[test]
    fn test_column_lookup() {
        let churn = TableSchema::churn();
        assert_eq!(churn.column("tenure").map(|c| c.kind), Some(ColumnType::Integer));
        assert!(churn.column("customerid").is_none());
        assert_eq!(churn.column_names().count(), 12);
    }
}
