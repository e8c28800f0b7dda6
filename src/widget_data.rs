//! Shapes cached sync rows into what widgets render: tables as
//! columns-plus-rows, charts as label/value points. Everything here is pure;
//! the HTTP layer feeds it rows from the sync cache.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::db::repos::sync_cache::DealRow;

/// Column order for deal tables. Chart field names resolve against these
/// case-insensitively, so `labelField: "stage"` works.
pub const DEAL_COLUMNS: [&str; 7] = [
    "Title", "Amount", "Currency", "Stage", "Pipeline", "Owner", "Status",
];

/// The freeform `config` blob on a widget, as far as data shaping reads it.
/// Unknown keys are ignored; a malformed blob falls back to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    pub sheet_title: Option<String>,
    pub range: Option<String>,
    #[serde(alias = "xField")]
    pub label_field: Option<String>,
    #[serde(alias = "yField")]
    pub value_field: Option<String>,
    /// Equality filters keyed by column name.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

pub fn parse_config(config: Option<&serde_json::Value>) -> WidgetConfig {
    config
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct DataPoint {
    pub label: String,
    pub value: f64,
}

/// One widget's data payload. Tables carry columns and rows, charts carry
/// aggregated points.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WidgetData {
    Table(TableData),
    Points { points: Vec<DataPoint> },
}

/// Build a table from raw sheet values. The first row is the header; body
/// rows are padded or truncated to the header width and run through the
/// equality filters.
pub fn table_from_sheet(values: &[Vec<String>], filters: &HashMap<String, String>) -> TableData {
    let Some((header, body)) = values.split_first() else {
        return TableData::empty();
    };
    let columns = header.clone();
    let rows = body
        .iter()
        .filter(|row| matches_filters(&columns, row, filters))
        .map(|row| normalize_row(row, columns.len()))
        .collect();
    TableData { columns, rows }
}

/// Build a table from cached CRM deals with the fixed [`DEAL_COLUMNS`]
/// header.
pub fn table_from_deals(deals: &[DealRow], filters: &HashMap<String, String>) -> TableData {
    let columns: Vec<String> = DEAL_COLUMNS.iter().map(|c| c.to_string()).collect();
    let rows = deals
        .iter()
        .map(|d| {
            vec![
                d.title.clone(),
                d.amount.map(|a| a.to_string()).unwrap_or_default(),
                d.currency.clone().unwrap_or_default(),
                d.stage.clone().unwrap_or_default(),
                d.pipeline.clone().unwrap_or_default(),
                d.owner.clone().unwrap_or_default(),
                d.status.clone().unwrap_or_default(),
            ]
        })
        .filter(|row| matches_filters(&columns, row, filters))
        .collect();
    TableData { columns, rows }
}

/// Aggregate a table into chart points, grouping rows by the label column
/// and summing the value column. Label defaults to the first column. When no
/// usable value column exists each row contributes 1, so the chart becomes a
/// count per label. Rows whose value cell does not parse as a number are
/// skipped.
pub fn points_from_table(
    table: &TableData,
    label_field: Option<&str>,
    value_field: Option<&str>,
) -> Vec<DataPoint> {
    if table.columns.is_empty() {
        return Vec::new();
    }
    let label_idx = label_field
        .and_then(|f| resolve_column(&table.columns, f))
        .unwrap_or(0);
    let value_idx = match value_field {
        Some(f) => resolve_column(&table.columns, f),
        None if table.columns.len() > 1 => Some(1),
        None => None,
    };

    let mut points: Vec<DataPoint> = Vec::new();
    for row in &table.rows {
        let label = row.get(label_idx).cloned().unwrap_or_default();
        let value = match value_idx {
            Some(i) => {
                let raw = row.get(i).map(String::as_str).unwrap_or("");
                match parse_number(raw) {
                    Some(v) => v,
                    None => continue,
                }
            }
            None => 1.0,
        };
        match points.iter_mut().find(|p| p.label == label) {
            Some(p) => p.value += value,
            None => points.push(DataPoint { label, value }),
        }
    }
    points
}

fn resolve_column(columns: &[String], name: &str) -> Option<usize> {
    columns.iter().position(|c| c.eq_ignore_ascii_case(name))
}

/// A filter on a column the table does not have matches nothing; a typo in a
/// preset should yield an empty table, not the unfiltered one.
fn matches_filters(
    columns: &[String],
    row: &[String],
    filters: &HashMap<String, String>,
) -> bool {
    filters.iter().all(|(column, want)| {
        resolve_column(columns, column)
            .map(|i| row.get(i).map(String::as_str).unwrap_or("") == want)
            .unwrap_or(false)
    })
}

fn normalize_row(row: &[String], width: usize) -> Vec<String> {
    let mut out: Vec<String> = row.iter().take(width).cloned().collect();
    out.resize(width, String::new());
    out
}

/// Parse a spreadsheet-flavored number: thousands separators and a leading
/// currency symbol are tolerated.
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(['$', '€', '£'])
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> Vec<Vec<String>> {
        vec![
            vec!["Region".into(), "Revenue".into(), "Owner".into()],
            vec!["EU".into(), "1,200".into(), "ana".into()],
            vec!["US".into(), "$800".into(), "bob".into()],
            vec!["EU".into(), "300".into(), "ana".into()],
            vec!["APAC".into(), "n/a".into(), "kim".into()],
        ]
    }

    #[test]
    fn test_table_from_sheet_header_and_padding() {
        let mut values = sheet();
        values.push(vec!["short".into()]);
        values.push(vec![
            "long".into(),
            "1".into(),
            "x".into(),
            "extra".into(),
        ]);

        let table = table_from_sheet(&values, &HashMap::new());
        assert_eq!(table.columns, vec!["Region", "Revenue", "Owner"]);
        assert_eq!(table.rows.len(), 6);
        // ragged rows are squared off to the header width
        assert_eq!(table.rows[4], vec!["short", "", ""]);
        assert_eq!(table.rows[5], vec!["long", "1", "x"]);
    }

    #[test]
    fn test_table_filters_are_equality_on_named_columns() {
        let mut filters = HashMap::new();
        filters.insert("owner".to_string(), "ana".to_string());
        let table = table_from_sheet(&sheet(), &filters);
        assert_eq!(table.rows.len(), 2);
        assert!(table.rows.iter().all(|r| r[2] == "ana"));

        // unknown filter column matches nothing
        let mut filters = HashMap::new();
        filters.insert("nope".to_string(), "x".to_string());
        assert!(table_from_sheet(&sheet(), &filters).rows.is_empty());
    }

    #[test]
    fn test_empty_sheet_gives_empty_table() {
        assert_eq!(table_from_sheet(&[], &HashMap::new()), TableData::empty());
        // header-only sheet keeps its columns
        let table = table_from_sheet(
            &[vec!["A".to_string(), "B".to_string()]],
            &HashMap::new(),
        );
        assert_eq!(table.columns.len(), 2);
        assert!(table.rows.is_empty());
    }

    #[test]
    fn test_points_group_and_sum() {
        let table = table_from_sheet(&sheet(), &HashMap::new());
        let points = points_from_table(&table, Some("Region"), Some("Revenue"));
        // EU rows merge, the unparseable APAC row is skipped
        assert_eq!(
            points,
            vec![
                DataPoint {
                    label: "EU".to_string(),
                    value: 1500.0
                },
                DataPoint {
                    label: "US".to_string(),
                    value: 800.0
                },
            ]
        );
    }

    #[test]
    fn test_points_default_to_first_and_second_column() {
        let table = table_from_sheet(&sheet(), &HashMap::new());
        let points = points_from_table(&table, None, None);
        assert_eq!(points[0].label, "EU");
        assert_eq!(points[0].value, 1500.0);
    }

    #[test]
    fn test_points_count_when_no_value_column() {
        let table = table_from_sheet(&sheet(), &HashMap::new());
        // a named value column that does not exist degrades to counting
        let points = points_from_table(&table, Some("Owner"), Some("missing"));
        assert_eq!(
            points,
            vec![
                DataPoint {
                    label: "ana".to_string(),
                    value: 2.0
                },
                DataPoint {
                    label: "bob".to_string(),
                    value: 1.0
                },
                DataPoint {
                    label: "kim".to_string(),
                    value: 1.0
                },
            ]
        );
    }

    fn deals() -> Vec<DealRow> {
        vec![
            DealRow {
                id: "d1".into(),
                title: "Acme".into(),
                amount: Some(1000.0),
                currency: Some("EUR".into()),
                stage: Some("Won".into()),
                pipeline: Some("Default".into()),
                owner: Some("Ana".into()),
                status: Some("open".into()),
                closed_at: None,
            },
            DealRow {
                id: "d2".into(),
                title: "Globex".into(),
                amount: Some(250.5),
                currency: Some("EUR".into()),
                stage: Some("Won".into()),
                pipeline: Some("Default".into()),
                owner: Some("Bob".into()),
                status: Some("open".into()),
                closed_at: None,
            },
            DealRow {
                id: "d3".into(),
                title: "Initech".into(),
                amount: None,
                currency: None,
                stage: Some("Lost".into()),
                pipeline: None,
                owner: None,
                status: Some("lost".into()),
                closed_at: Some("2026-01-01T00:00:00Z".into()),
            },
        ]
    }

    #[test]
    fn test_deal_table_and_points() {
        let table = table_from_deals(&deals(), &HashMap::new());
        assert_eq!(table.columns, DEAL_COLUMNS.to_vec());
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0][0], "Acme");
        assert_eq!(table.rows[2][1], ""); // missing amount renders empty

        let points = points_from_table(&table, Some("stage"), Some("amount"));
        assert_eq!(
            points,
            vec![DataPoint {
                label: "Won".to_string(),
                value: 1250.5
            }]
        );
    }

    #[test]
    fn test_deal_filters() {
        let mut filters = HashMap::new();
        filters.insert("Status".to_string(), "open".to_string());
        let table = table_from_deals(&deals(), &filters);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_parse_number_variants() {
        assert_eq!(parse_number("1,200"), Some(1200.0));
        assert_eq!(parse_number("$800"), Some(800.0));
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
        assert_eq!(parse_number("-3"), Some(-3.0));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("n/a"), None);
    }

    #[test]
    fn test_parse_config_tolerates_malformed_blobs() {
        let config = parse_config(Some(&serde_json::json!({
            "sheetTitle": "Deals",
            "xField": "Region",
            "filters": { "Owner": "ana" },
            "unknown": [1, 2, 3],
        })));
        assert_eq!(config.sheet_title.as_deref(), Some("Deals"));
        assert_eq!(config.label_field.as_deref(), Some("Region"));
        assert_eq!(config.filters.get("Owner").map(String::as_str), Some("ana"));

        // not an object at all
        let config = parse_config(Some(&serde_json::json!("garbage")));
        assert!(config.sheet_title.is_none());
        assert!(parse_config(None).filters.is_empty());
    }
}
