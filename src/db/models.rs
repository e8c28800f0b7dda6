use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Enums (stored as TEXT, CHECK-constrained in the schema)
// ============================================================================

/// Raised when a TEXT column holds a value outside the enum's set.
#[derive(Debug, thiserror::Error)]
#[error("invalid {kind} value: {value}")]
pub struct InvalidEnumValue {
    kind: &'static str,
    value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
        #[ts(export)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = InvalidEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(InvalidEnumValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: InvalidEnumValue| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

// Dashboards are a fixed namespace, not rows: unknown slugs are a 404.
text_enum!(DashboardSlug, "dashboard slug", {
    Pm => "pm",
    Sales => "sales",
    Ops => "ops",
});

impl DashboardSlug {
    pub const ALL: [DashboardSlug; 3] =
        [DashboardSlug::Pm, DashboardSlug::Sales, DashboardSlug::Ops];
}

text_enum!(EntityStatus, "status", {
    Draft => "draft",
    Published => "published",
    Deleted => "deleted",
});

text_enum!(LayoutKind, "layout kind", {
    Draft => "draft",
    Published => "published",
});

text_enum!(SourceType, "source type", {
    Spreadsheet => "spreadsheet",
    Crm => "crm",
});

text_enum!(WidgetType, "widget type", {
    Table => "table",
    Line => "line",
    Bar => "bar",
    Pie => "pie",
});

// ============================================================================
// Data Sources
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: String,
    pub source_type: SourceType,
    pub spreadsheet_id: Option<String>,
    pub title: String,
    pub status: EntityStatus,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSheet {
    pub id: String,
    pub data_source_id: String,
    pub title: String,
    pub range: String,
    pub position: i32,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SheetInput {
    pub title: String,
    pub range: String,
}

#[derive(Debug, Clone)]
pub struct CreateDataSourceInput {
    pub source_type: SourceType,
    pub spreadsheet_id: Option<String>,
    pub title: String,
    pub sheets: Vec<SheetInput>,
}

/// Data source plus its sheets, as the global listing returns it.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceWithSheets {
    #[serde(flatten)]
    pub source: DataSource,
    pub sheets: Vec<DataSourceSheet>,
}

/// Data source as seen from one dashboard, carrying the link's own status.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LinkedDataSource {
    #[serde(flatten)]
    pub source: DataSource,
    pub sheets: Vec<DataSourceSheet>,
    pub link_status: EntityStatus,
}

// ============================================================================
// Dashboard ↔ DataSource links
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DashboardLink {
    pub id: String,
    pub dashboard_slug: DashboardSlug,
    pub data_source_id: String,
    pub status: EntityStatus,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================================================
// Widgets
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    pub id: String,
    pub dashboard_slug: DashboardSlug,
    pub widget_type: WidgetType,
    pub title: String,
    pub data_source_id: Option<String>,
    /// Free-form blob: sheet title, range, chart field mapping, filter presets.
    #[ts(type = "any | null")]
    pub config: Option<serde_json::Value>,
    pub status: EntityStatus,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CreateWidgetInput {
    pub widget_type: WidgetType,
    pub title: String,
    pub data_source_id: Option<String>,
    #[ts(type = "any | null")]
    pub config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWidgetInput {
    pub widget_type: Option<WidgetType>,
    pub title: Option<String>,
    #[serde(default, with = "serde_double_option")]
    #[ts(type = "string | null")]
    pub data_source_id: Option<Option<String>>,
    #[ts(type = "any | null")]
    pub config: Option<serde_json::Value>,
}

/// Distinguishes "field absent" from "field present and null" so PATCH can
/// clear `data_source_id`.
mod serde_double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

// ============================================================================
// Widget layouts (the draft/published staging mechanism)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct WidgetLayout {
    pub id: String,
    pub widget_id: String,
    pub kind: LayoutKind,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    pub z_index: i64,
    pub updated_at: String,
}

/// One geometry entry in a bulk draft upsert (`PUT layout/draft`).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LayoutUpsert {
    pub widget_id: String,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    #[serde(default)]
    pub z_index: i64,
}

/// Widget joined with the geometry of one layout kind, as the layout
/// endpoint returns it. Draft reads fall back to the published row per
/// widget, so the geometry here is already resolved.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct WidgetWithLayout {
    #[serde(flatten)]
    pub widget: Widget,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    pub z_index: i64,
}

// ============================================================================
// Metrics cache
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetric {
    pub dashboard_slug: DashboardSlug,
    pub metric: String,
    #[ts(type = "any")]
    pub value: serde_json::Value,
    pub computed_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trips() {
        assert_eq!("pm".parse::<DashboardSlug>().unwrap(), DashboardSlug::Pm);
        assert_eq!(DashboardSlug::Sales.as_str(), "sales");
        assert_eq!(
            "published".parse::<EntityStatus>().unwrap(),
            EntityStatus::Published
        );
        assert_eq!(LayoutKind::Draft.as_str(), "draft");
        assert_eq!("pie".parse::<WidgetType>().unwrap(), WidgetType::Pie);
        assert!("kanban".parse::<WidgetType>().is_err());
        assert!("crm2".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_slug_serde_uses_lowercase() {
        let json = serde_json::to_string(&DashboardSlug::Pm).unwrap();
        assert_eq!(json, "\"pm\"");
        let back: DashboardSlug = serde_json::from_str("\"ops\"").unwrap();
        assert_eq!(back, DashboardSlug::Ops);
    }

    #[test]
    fn test_update_widget_input_distinguishes_absent_from_null() {
        let absent: UpdateWidgetInput = serde_json::from_str(r#"{"title":"Deals"}"#).unwrap();
        assert!(absent.data_source_id.is_none());

        let cleared: UpdateWidgetInput =
            serde_json::from_str(r#"{"dataSourceId":null}"#).unwrap();
        assert_eq!(cleared.data_source_id, Some(None));

        let set: UpdateWidgetInput =
            serde_json::from_str(r#"{"dataSourceId":"ds-1"}"#).unwrap();
        assert_eq!(set.data_source_id, Some(Some("ds-1".into())));
    }

    #[test]
    fn test_layout_upsert_defaults_z_index() {
        let entry: LayoutUpsert =
            serde_json::from_str(r#"{"widgetId":"w1","x":0,"y":10,"w":40,"h":30}"#).unwrap();
        assert_eq!(entry.z_index, 0);
        assert_eq!(entry.widget_id, "w1");
    }
}
