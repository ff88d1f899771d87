//! Endpoints for the `table` entity.

use serde_json::{json, Value};

use crate::cache::{id_tag_from_value, Tag};
use crate::error::CacheError;
use crate::registry::{body_without, path_id, EndpointRegistry, TagProvider, TagTemplate};
use crate::transport::TransportRequest;

pub const LIST_TABLES: &str = "listTables";
pub const GET_TABLE: &str = "getTable";
pub const GET_TABLE_METADATA: &str = "getTableMetadata";
pub const LIST_TABLE_FOREIGN_KEYS: &str = "listTableForeignKeys";
pub const UPDATE_TABLE: &str = "updateTable";
pub const UPDATE_TABLE_LIST: &str = "updateTableList";
pub const UPDATE_TABLE_FIELDS_ORDER: &str = "updateTableFieldsOrder";
pub const RESCAN_TABLE_FIELD_VALUES: &str = "rescanTableFieldValues";
pub const DISCARD_TABLE_FIELD_VALUES: &str = "discardTableFieldValues";

const TABLE: &str = "table";
const FIELD: &str = "field";
const FIELD_VALUES: &str = "field-values";
const DATABASE: &str = "database";
const CARD: &str = "card";

fn table_path(args: &Value, suffix: &str) -> Result<String, CacheError> {
  Ok(format!("/api/table/{}{}", path_id(args, "id")?, suffix))
}

fn table_id() -> TagTemplate {
  TagTemplate::id_from_arg(TABLE, "id")
}

/// Tags for a table's query metadata: the table, its fields and, when the
/// payload names one, its database. All ids come from the payload.
fn query_metadata_tags(result: Option<&Value>, _error: Option<&CacheError>, _args: &Value) -> Vec<Tag> {
  let mut tags = Vec::new();
  let mut push = |kind: &str, id: Option<&Value>| {
    if let Some(tag) = id.filter(|id| !id.is_null()).and_then(|id| id_tag_from_value(kind, id).ok()) {
      tags.push(tag);
    }
  };

  if let Some(result) = result {
    push(TABLE, result.get("id"));
    push(DATABASE, result.get("db_id"));
    for field in result.get("fields").and_then(Value::as_array).into_iter().flatten() {
      push(FIELD, field.get("id"));
    }
  }
  tags
}

pub fn register(registry: &mut EndpointRegistry) {
  registry
    .query(
      LIST_TABLES,
      |_| Ok(TransportRequest::get("/api/table")),
      TagProvider::templates([
        TagTemplate::List(TABLE.to_string()),
        TagTemplate::ids_from_result_list(TABLE, "id"),
      ]),
    )
    .query(
      GET_TABLE,
      |args| Ok(TransportRequest::get(table_path(args, "")?)),
      TagProvider::templates([TagTemplate::id_from_result(TABLE, "id")]),
    )
    .query(
      GET_TABLE_METADATA,
      |args| {
        Ok(
          TransportRequest::get(table_path(args, "/query_metadata")?)
            .with_params(&body_without(args, &["id"])),
        )
      },
      TagProvider::from_fn(query_metadata_tags),
    )
    .query(
      LIST_TABLE_FOREIGN_KEYS,
      |args| Ok(TransportRequest::get(table_path(args, "/fks")?)),
      TagProvider::templates([TagTemplate::List(FIELD.to_string())]),
    )
    .mutation(
      UPDATE_TABLE,
      |args| Ok(TransportRequest::put(table_path(args, "")?, body_without(args, &["id"]))),
      TagProvider::templates([
        table_id(),
        TagTemplate::Type(DATABASE.to_string()),
        TagTemplate::Type(CARD.to_string()),
      ]),
    )
    .mutation(
      UPDATE_TABLE_LIST,
      |args| {
        if !args.get("ids").is_some_and(Value::is_array) {
          return Err(CacheError::invalid_argument("`ids` must be an array"));
        }
        Ok(TransportRequest::put("/api/table", args.clone()))
      },
      TagProvider::templates([
        TagTemplate::Type(TABLE.to_string()),
        TagTemplate::Type(DATABASE.to_string()),
        TagTemplate::Type(CARD.to_string()),
      ]),
    )
    .mutation(
      UPDATE_TABLE_FIELDS_ORDER,
      |args| {
        let order = args
          .get("field_order")
          .filter(|order| order.is_array())
          .cloned()
          .ok_or_else(|| CacheError::invalid_argument("`field_order` must be an array"))?;
        Ok(TransportRequest::put(table_path(args, "/fields/order")?, order))
      },
      TagProvider::templates([
        table_id(),
        TagTemplate::List(FIELD.to_string()),
        TagTemplate::Type(CARD.to_string()),
      ]),
    )
    .mutation(
      RESCAN_TABLE_FIELD_VALUES,
      |args| Ok(TransportRequest::post(table_path(args, "/rescan_values")?, None)),
      TagProvider::templates([TagTemplate::Type(FIELD_VALUES.to_string())]),
    )
    .mutation(
      DISCARD_TABLE_FIELD_VALUES,
      |args| Ok(TransportRequest::post(table_path(args, "/discard_values")?, Some(json!({})))),
      TagProvider::templates([TagTemplate::Type(FIELD_VALUES.to_string())]),
    );
}
