//! In-memory mirror of the remote collections.
//!
//! `Collections` is owned by the reconciler, which is its only writer. Everything
//! else reads snapshots.

use crate::entity::{EntityType, Record, RecordId};

/// Where a collection is in its load lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStatus {
  /// Never loaded, or cleared by teardown
  #[default]
  Idle,
  /// A fetch is in flight
  Loading,
  /// Contents mirror the last successful fetch plus applied deltas
  Ready,
  /// The last fetch failed; contents were reset to empty
  Failed,
}

#[derive(Debug, Default)]
struct Collection {
  records: Vec<Record>,
  status: LoadStatus,
}

/// The ten entity collections, newest first.
#[derive(Debug)]
pub struct Collections {
  collections: [Collection; EntityType::ALL.len()],
}

impl Collections {
  pub fn new() -> Self {
    Self {
      collections: std::array::from_fn(|_| Collection::default()),
    }
  }

  fn collection(&self, entity: EntityType) -> &Collection {
    &self.collections[entity as usize]
  }

  fn collection_mut(&mut self, entity: EntityType) -> &mut Collection {
    &mut self.collections[entity as usize]
  }

  pub fn records(&self, entity: EntityType) -> &[Record] {
    &self.collection(entity).records
  }

  pub fn status(&self, entity: EntityType) -> LoadStatus {
    self.collection(entity).status
  }

  pub fn set_status(&mut self, entity: EntityType, status: LoadStatus) {
    self.collection_mut(entity).status = status;
  }

  /// Full replace, never a merge.
  pub fn replace(&mut self, entity: EntityType, records: Vec<Record>, status: LoadStatus) {
    let collection = self.collection_mut(entity);
    collection.records = records;
    collection.status = status;
  }

  fn position(&self, entity: EntityType, id: &RecordId) -> Option<usize> {
    self.records(entity).iter().position(|r| &r.id == id)
  }

  /// Prepend `record`, or replace it in place when its id is already present.
  pub fn insert_front(&mut self, entity: EntityType, record: Record) {
    match self.position(entity, &record.id) {
      Some(index) => self.collection_mut(entity).records[index] = record,
      None => self.collection_mut(entity).records.insert(0, record),
    }
  }

  /// Replace the record with the same id. Returns false when it is unknown.
  pub fn replace_record(&mut self, entity: EntityType, record: Record) -> bool {
    match self.position(entity, &record.id) {
      Some(index) => {
        self.collection_mut(entity).records[index] = record;
        true
      }
      None => false,
    }
  }

  /// Remove the record with `id`. Returns false when it is unknown.
  pub fn remove(&mut self, entity: EntityType, id: &RecordId) -> bool {
    match self.position(entity, id) {
      Some(index) => {
        self.collection_mut(entity).records.remove(index);
        true
      }
      None => false,
    }
  }

  /// Empty every collection and reset it to `Idle`.
  pub fn clear(&mut self) {
    for collection in self.collections.iter_mut() {
      *collection = Collection::default();
    }
  }
}

impl Default for Collections {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::{json, Map};

  fn record(id: i64, name: &str) -> Record {
    let mut fields = Map::new();
    fields.insert("name".into(), json!(name));
    Record::new(id, fields)
  }

  #[test]
  fn test_starts_empty_and_idle() {
    let collections = Collections::new();
    for entity in EntityType::ALL {
      assert!(collections.records(entity).is_empty());
      assert_eq!(collections.status(entity), LoadStatus::Idle);
    }
  }

  #[test]
  fn test_replace_is_not_a_merge() {
    let mut collections = Collections::new();
    collections.replace(
      EntityType::Projects,
      vec![record(1, "A"), record(2, "B")],
      LoadStatus::Ready,
    );
    collections.replace(EntityType::Projects, vec![record(3, "C")], LoadStatus::Ready);

    assert_eq!(collections.records(EntityType::Projects), &[record(3, "C")]);
  }

  #[test]
  fn test_insert_front_with_known_id_replaces() {
    let mut collections = Collections::new();
    collections.insert_front(EntityType::Materials, record(1, "Cement"));
    collections.insert_front(EntityType::Materials, record(2, "Rebar"));
    collections.insert_front(EntityType::Materials, record(1, "Cement 50kg"));

    let records = collections.records(EntityType::Materials);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], record(2, "Rebar"));
    assert_eq!(records[1], record(1, "Cement 50kg"));
  }

  #[test]
  fn test_unknown_ids_are_misses() {
    let mut collections = Collections::new();
    assert!(!collections.replace_record(EntityType::Invoices, record(9, "X")));
    assert!(!collections.remove(EntityType::Invoices, &RecordId::Int(9)));
    assert!(collections.records(EntityType::Invoices).is_empty());
  }

  #[test]
  fn test_clear_resets_status() {
    let mut collections = Collections::new();
    collections.replace(EntityType::Employees, vec![record(1, "Ana")], LoadStatus::Ready);
    collections.clear();
    assert!(collections.records(EntityType::Employees).is_empty());
    assert_eq!(collections.status(EntityType::Employees), LoadStatus::Idle);
  }
}
