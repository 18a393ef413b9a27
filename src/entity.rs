//! Entity type tags and the opaque record shape shared by every collection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Field payload sent with create/update calls. Never interpreted locally.
pub type Payload = Map<String, Value>;

/// The ten record categories mirrored from the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
  Projects,
  Transactions,
  Invoices,
  Employees,
  Equipment,
  Materials,
  MaterialPurchases,
  MaterialUsage,
  EquipmentBorrows,
  Attendance,
}

impl EntityType {
  pub const ALL: [EntityType; 10] = [
    EntityType::Projects,
    EntityType::Transactions,
    EntityType::Invoices,
    EntityType::Employees,
    EntityType::Equipment,
    EntityType::Materials,
    EntityType::MaterialPurchases,
    EntityType::MaterialUsage,
    EntityType::EquipmentBorrows,
    EntityType::Attendance,
  ];

  /// Default remote table name, also used as the cache key.
  pub fn table_name(self) -> &'static str {
    match self {
      EntityType::Projects => "projects",
      EntityType::Transactions => "transactions",
      EntityType::Invoices => "invoices",
      EntityType::Employees => "employees",
      EntityType::Equipment => "equipment",
      EntityType::Materials => "materials",
      EntityType::MaterialPurchases => "material_purchases",
      EntityType::MaterialUsage => "material_usage",
      EntityType::EquipmentBorrows => "equipment_borrows",
      EntityType::Attendance => "attendance",
    }
  }

  /// Whether changes to this type feed the dashboard aggregates.
  pub fn affects_dashboard(self) -> bool {
    matches!(
      self,
      EntityType::Projects
        | EntityType::Transactions
        | EntityType::Invoices
        | EntityType::Employees
        | EntityType::Equipment
    )
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.table_name())
  }
}

impl FromStr for EntityType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized = s.trim().to_lowercase().replace('-', "_");
    EntityType::ALL
      .into_iter()
      .find(|e| e.table_name() == normalized)
      .ok_or_else(|| format!("unknown entity type '{}'", s))
  }
}

/// Record identifier. The hosted store hands out integer or uuid keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
  Int(i64),
  Text(String),
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecordId::Int(id) => write!(f, "{}", id),
      RecordId::Text(id) => f.write_str(id),
    }
  }
}

impl From<i64> for RecordId {
  fn from(id: i64) -> Self {
    RecordId::Int(id)
  }
}

impl From<&str> for RecordId {
  fn from(id: &str) -> Self {
    match id.parse::<i64>() {
      Ok(n) => RecordId::Int(n),
      Err(_) => RecordId::Text(id.to_string()),
    }
  }
}

/// A row of any collection: identifier plus opaque fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub id: RecordId,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

impl Record {
  pub fn new(id: impl Into<RecordId>, fields: Map<String, Value>) -> Self {
    Self {
      id: id.into(),
      fields,
    }
  }

  pub fn get(&self, field: &str) -> Option<&Value> {
    self.fields.get(field)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_entity_type() {
    assert_eq!("projects".parse(), Ok(EntityType::Projects));
    assert_eq!(
      "Material-Purchases".parse(),
      Ok(EntityType::MaterialPurchases)
    );
    assert!("widgets".parse::<EntityType>().is_err());
  }

  #[test]
  fn test_table_names_are_unique() {
    let mut names: Vec<_> = EntityType::ALL.iter().map(|e| e.table_name()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), EntityType::ALL.len());
  }

  #[test]
  fn test_record_keeps_opaque_fields() {
    let record: Record =
      serde_json::from_value(json!({"id": 7, "name": "Bridge", "budget": 1200.5})).unwrap();
    assert_eq!(record.id, RecordId::Int(7));
    assert_eq!(record.get("name"), Some(&json!("Bridge")));

    let back = serde_json::to_value(&record).unwrap();
    assert_eq!(back["budget"], json!(1200.5));
    assert_eq!(back["id"], json!(7));
  }

  #[test]
  fn test_uuid_record_id() {
    let record: Record =
      serde_json::from_value(json!({"id": "0b9c6a52-8d4e-4f7e-9a51-2f6b0c1e3d11"})).unwrap();
    assert!(matches!(record.id, RecordId::Text(_)));
    assert_eq!(RecordId::from("42"), RecordId::Int(42));
  }
}
