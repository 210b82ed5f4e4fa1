//! Seed records and their stable identity
//!
//! A record's `original_index` is its position in the caller's list. It is the
//! only identity that survives across runs, so it travels with the payload
//! through every stage instead of being reconstructed from array positions.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ConfigError, ConfigResult};
use seeder_storage::{BatchId, SuccessRecord};

/// Anything that carries its position in the original record list
pub trait Indexed {
    fn original_index(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomerSpec {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineItemSpec {
    pub sku: String,
    pub quantity: u32,
}

/// Domain payload of one order, as written in a seed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderSpec {
    pub customer: CustomerSpec,
    pub line_items: Vec<LineItemSpec>,
    /// Free-form tags forwarded to the order API
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// One unit of work, immutable once submitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSpec {
    pub original_index: usize,
    pub order: OrderSpec,
}

impl RecordSpec {
    pub fn new(original_index: usize, order: OrderSpec) -> Self {
        Self {
            original_index,
            order,
        }
    }

    /// Field reported alongside failures so operators can find the record.
    pub fn identifier(&self) -> &str {
        &self.order.customer.email
    }

    /// Join key the order API echoes back for this record.
    ///
    /// Deterministic per batch, so a resumed run submits the same reference
    /// the first run did.
    pub fn reference(&self, batch_id: &BatchId) -> String {
        format!("{}-{}", batch_id, self.original_index)
    }
}

impl Indexed for RecordSpec {
    fn original_index(&self) -> usize {
        self.original_index
    }
}

/// A stage-1 success paired with the record that produced it; stage-2 input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedOrder {
    pub original_index: usize,
    pub external_id: String,
    pub display_number: Option<String>,
    pub record: RecordSpec,
}

impl ConfirmedOrder {
    pub fn from_success(success: &SuccessRecord, record: &RecordSpec) -> Self {
        Self {
            original_index: success.original_index,
            external_id: success.external_id.clone(),
            display_number: success.display_number.clone(),
            record: record.clone(),
        }
    }

    pub fn identifier(&self) -> &str {
        self.display_number
            .as_deref()
            .unwrap_or(self.external_id.as_str())
    }
}

impl Indexed for ConfirmedOrder {
    fn original_index(&self) -> usize {
        self.original_index
    }
}

/// Fresh batch id: UTC timestamp plus a short random suffix.
pub fn new_batch_id() -> BatchId {
    let suffix = Uuid::new_v4().simple().to_string();
    BatchId::new(format!(
        "batch-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..8]
    ))
}

/// Ordered list of records for one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedBatch {
    records: Vec<RecordSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeedFile {
    orders: Vec<OrderSpec>,
}

impl SeedBatch {
    /// Assign original indices by position.
    pub fn new(orders: Vec<OrderSpec>) -> Self {
        let records = orders
            .into_iter()
            .enumerate()
            .map(|(idx, order)| RecordSpec::new(idx, order))
            .collect();
        Self { records }
    }

    /// Load an `orders:` list from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let file: SeedFile = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| ConfigError::Custom(format!("{}: {}", path.display(), e)))?,
            _ => serde_yaml::from_str(&content)?,
        };
        if file.orders.is_empty() {
            return Err(ConfigError::Custom(format!(
                "{}: seed file contains no orders",
                path.display()
            )));
        }
        Ok(Self::new(file.orders))
    }

    pub fn records(&self) -> &[RecordSpec] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RecordSpec> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Every index in `0..len` exactly once, in any order.
pub fn check_indices(records: &[RecordSpec]) -> std::result::Result<(), String> {
    let mut seen = vec![false; records.len()];
    for record in records {
        let idx = record.original_index;
        if idx >= records.len() {
            return Err(format!(
                "original index {} out of range for {} records",
                idx,
                records.len()
            ));
        }
        if seen[idx] {
            return Err(format!("original index {} appears twice", idx));
        }
        seen[idx] = true;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_seed_batch_assigns_positions() {
        let batch = SeedBatch::new(vec![order("a@x.io"), order("b@x.io")]);
        let idx: Vec<_> = batch.records().iter().map(|r| r.original_index).collect();
        assert_eq!(idx, vec![0, 1]);
        assert_eq!(batch.records()[1].identifier(), "b@x.io");
    }

    #[test]
    fn test_reference_is_stable_per_batch() {
        let record = &records(3)[2];
        let batch = BatchId::new("batch-1");
        assert_eq!(record.reference(&batch), "batch-1-2");
        assert_eq!(record.reference(&batch), record.reference(&batch.clone()));
    }

    #[test]
    fn test_new_batch_id_is_storage_safe_and_unique() {
        let a = new_batch_id();
        let b = new_batch_id();
        assert!(a.is_storage_safe());
        assert!(a.as_str().starts_with("batch-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_check_indices() {
        let mut recs = records(3);
        assert!(check_indices(&recs).is_ok());

        recs[2].original_index = 0;
        assert!(check_indices(&recs).unwrap_err().contains("twice"));

        recs[2].original_index = 7;
        assert!(check_indices(&recs).unwrap_err().contains("out of range"));
    }

    #[test]
    fn test_seed_batch_from_yaml() {
        let yaml = r#"
orders:
  - customer: { email: "a@example.com", first_name: "Ada" }
    line_items:
      - { sku: "TSHIRT-M", quantity: 2 }
  - customer: { email: "b@example.com" }
    line_items:
      - { sku: "MUG", quantity: 1 }
    tags: ["fragile"]
"#;
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let batch = SeedBatch::from_path(file.path()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records()[0].order.line_items[0].quantity, 2);
        assert_eq!(batch.records()[1].order.tags, vec!["fragile"]);
    }

    #[test]
    fn test_seed_batch_rejects_unknown_fields() {
        let json = r#"{"orders": [{"customer": {"email": "a@x.io"}, "line_items": [], "carrier": "ups"}]}"#;
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(json.as_bytes()).unwrap();

        assert!(SeedBatch::from_path(file.path()).is_err());
    }

    #[test]
    fn test_seed_batch_rejects_empty() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(b"orders: []\n").unwrap();
        assert!(SeedBatch::from_path(file.path()).is_err());
    }
}
