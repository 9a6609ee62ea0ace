//! Schema Diff Engine
//!
//! Compares two environment snapshots: which tables exist on one side only,
//! which columns differ, and where declared types disagree. Pure and
//! deterministic; every list in the output is sorted.

use crate::introspection::{SchemaSnapshot, TableSchema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Column-level differences for one table present on both sides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDifference {
    pub only_in_source: Vec<String>,
    pub only_in_target: Vec<String>,
    pub type_differences: Vec<TypeDifference>,
}

impl ColumnDifference {
    pub fn is_empty(&self) -> bool {
        self.only_in_source.is_empty() && self.only_in_target.is_empty() && self.type_differences.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDifference {
    pub column: String,
    pub source_type: String,
    pub target_type: String,
}

/// Complete schema diff result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDiff {
    pub source: String,
    pub target: String,
    pub tables_only_in_source: Vec<String>,
    pub tables_only_in_target: Vec<String>,
    pub tables_in_both: Vec<String>,
    /// Only tables with at least one difference appear here
    pub column_differences: BTreeMap<String, ColumnDifference>,
}

impl SchemaDiff {
    pub fn is_identical(&self) -> bool {
        self.tables_only_in_source.is_empty()
            && self.tables_only_in_target.is_empty()
            && self.column_differences.is_empty()
    }
}

/// Row counts of one table on both sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowCountComparison {
    pub source_count: i64,
    pub target_count: i64,
    /// `source_count - target_count`
    pub difference: i64,
}

/// Output of `compare`: the diff, plus row counts when requested
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareReport {
    #[serde(flatten)]
    pub diff: SchemaDiff,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_counts: Option<BTreeMap<String, RowCountComparison>>,
}

/// The diff engine that compares schema snapshots
pub struct DiffEngine;

impl DiffEngine {
    /// Compare `source` against `target`
    pub fn diff(source: &SchemaSnapshot, target: &SchemaSnapshot) -> SchemaDiff {
        let source_tables: BTreeSet<&str> = source.tables.keys().map(String::as_str).collect();
        let target_tables: BTreeSet<&str> = target.tables.keys().map(String::as_str).collect();

        let mut column_differences = BTreeMap::new();
        let mut tables_in_both = Vec::new();

        for name in source_tables.intersection(&target_tables) {
            tables_in_both.push(name.to_string());
            let difference = Self::diff_columns(&source.tables[*name], &target.tables[*name]);
            if !difference.is_empty() {
                column_differences.insert(name.to_string(), difference);
            }
        }

        SchemaDiff {
            source: source.environment.clone(),
            target: target.environment.clone(),
            tables_only_in_source: to_strings(source_tables.difference(&target_tables)),
            tables_only_in_target: to_strings(target_tables.difference(&source_tables)),
            tables_in_both,
            column_differences,
        }
    }

    fn diff_columns(source: &TableSchema, target: &TableSchema) -> ColumnDifference {
        let source_cols: BTreeSet<&str> = source.columns.iter().map(|c| c.name.as_str()).collect();
        let target_cols: BTreeSet<&str> = target.columns.iter().map(|c| c.name.as_str()).collect();

        // Type mismatches are checked on common columns even when the sets differ
        let type_differences = source_cols
            .intersection(&target_cols)
            .filter_map(|name| {
                let s = source.column(name)?;
                let t = target.column(name)?;
                (s.data_type != t.data_type).then(|| TypeDifference {
                    column: name.to_string(),
                    source_type: s.data_type.clone(),
                    target_type: t.data_type.clone(),
                })
            })
            .collect();

        ColumnDifference {
            only_in_source: to_strings(source_cols.difference(&target_cols)),
            only_in_target: to_strings(target_cols.difference(&source_cols)),
            type_differences,
        }
    }

    /// Row counts of the tables present on both sides
    pub fn row_counts(source: &SchemaSnapshot, target: &SchemaSnapshot) -> BTreeMap<String, RowCountComparison> {
        source
            .tables
            .iter()
            .filter_map(|(name, s)| {
                let t = target.tables.get(name)?;
                Some((
                    name.clone(),
                    RowCountComparison {
                        source_count: s.row_count,
                        target_count: t.row_count,
                        difference: s.row_count - t.row_count,
                    },
                ))
            })
            .collect()
    }
}

fn to_strings<S: ToString>(names: impl Iterator<Item = S>) -> Vec<String> {
    names.map(|n| n.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::testing::{snapshot, table};
    use pretty_assertions::assert_eq;

    fn dev() -> SchemaSnapshot {
        snapshot(
            "dev",
            vec![
                ("users", table(&[("id", "integer"), ("email", "text")], 10)),
                (
                    "orders",
                    table(&[("id", "integer"), ("amount", "numeric"), ("note", "text")], 25),
                ),
                ("promo", table(&[("code", "text")], 2)),
            ],
        )
    }

    fn prod() -> SchemaSnapshot {
        snapshot(
            "prod",
            vec![
                ("users", table(&[("id", "integer"), ("email", "text")], 12)),
                ("orders", table(&[("id", "integer"), ("amount", "integer")], 20)),
            ],
        )
    }

    #[test]
    fn test_diff_new_table_and_column_changes() {
        let diff = DiffEngine::diff(&dev(), &prod());

        assert_eq!(diff.source, "dev");
        assert_eq!(diff.target, "prod");
        assert_eq!(diff.tables_only_in_source, vec!["promo".to_string()]);
        assert!(diff.tables_only_in_target.is_empty());
        assert_eq!(diff.tables_in_both, vec!["orders".to_string(), "users".to_string()]);

        let mut expected = BTreeMap::new();
        expected.insert(
            "orders".to_string(),
            ColumnDifference {
                only_in_source: vec!["note".to_string()],
                only_in_target: vec![],
                type_differences: vec![TypeDifference {
                    column: "amount".to_string(),
                    source_type: "numeric".to_string(),
                    target_type: "integer".to_string(),
                }],
            },
        );
        assert_eq!(diff.column_differences, expected);
        assert!(!diff.is_identical());
    }

    #[test]
    fn test_compare_dev_with_prod_numeric_total() {
        let dev = snapshot(
            "dev",
            vec![
                ("orders", table(&[("total", "numeric")], 3)),
                ("promo", table(&[("code", "text")], 1)),
            ],
        );
        let prod = snapshot("prod", vec![("orders", table(&[("total", "double precision")], 3))]);

        let diff = DiffEngine::diff(&dev, &prod);
        assert_eq!(diff.tables_only_in_source, vec!["promo".to_string()]);
        assert!(diff.tables_only_in_target.is_empty());
        assert_eq!(
            diff.column_differences["orders"].type_differences,
            vec![TypeDifference {
                column: "total".to_string(),
                source_type: "numeric".to_string(),
                target_type: "double precision".to_string(),
            }]
        );
    }

    #[test]
    fn test_type_mismatch_with_equal_column_sets() {
        let a = snapshot("a", vec![("t", table(&[("x", "integer")], 0))]);
        let b = snapshot("b", vec![("t", table(&[("x", "bigint")], 0))]);

        let diff = DiffEngine::diff(&a, &b);
        let t = &diff.column_differences["t"];
        assert!(t.only_in_source.is_empty() && t.only_in_target.is_empty());
        assert_eq!(t.type_differences.len(), 1);
    }

    #[test]
    fn test_diff_is_antisymmetric() {
        let forward = DiffEngine::diff(&dev(), &prod());
        let backward = DiffEngine::diff(&prod(), &dev());

        assert_eq!(forward.tables_only_in_source, backward.tables_only_in_target);
        assert_eq!(forward.tables_only_in_target, backward.tables_only_in_source);
        assert_eq!(forward.tables_in_both, backward.tables_in_both);

        for (name, f) in &forward.column_differences {
            let b = &backward.column_differences[name];
            assert_eq!(f.only_in_source, b.only_in_target);
            assert_eq!(f.only_in_target, b.only_in_source);
            for (ft, bt) in f.type_differences.iter().zip(&b.type_differences) {
                assert_eq!(ft.column, bt.column);
                assert_eq!(ft.source_type, bt.target_type);
                assert_eq!(ft.target_type, bt.source_type);
            }
        }
    }

    #[test]
    fn test_identical_snapshots() {
        let diff = DiffEngine::diff(&dev(), &dev());
        assert!(diff.is_identical());
        assert_eq!(diff.tables_in_both.len(), 3);
    }

    #[test]
    fn test_row_counts_common_tables_only() {
        let counts = DiffEngine::row_counts(&dev(), &prod());
        assert_eq!(counts.keys().collect::<Vec<_>>(), vec!["orders", "users"]);
        assert_eq!(
            counts["users"],
            RowCountComparison {
                source_count: 10,
                target_count: 12,
                difference: -2
            }
        );
        assert_eq!(counts["orders"].difference, 5);
    }

    #[test]
    fn test_compare_report_flattens_diff() {
        let report = CompareReport {
            diff: DiffEngine::diff(&dev(), &prod()),
            row_counts: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["tablesOnlyInSource"][0], "promo");
        assert!(json.get("rowCounts").is_none());
    }
}
