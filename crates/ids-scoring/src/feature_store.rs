//! The Feature Store: classifier model, feature order, and categorical
//! maps loaded once at startup and read-only thereafter (spec.md §4.4,
//! §6). Vectorization order and "keep unseen" handling are grounded on
//! `original_source/.../detector-ia/ml_processor.py`'s
//! `tu_funcion_transformar_flujo`.

use std::collections::HashMap;
use std::path::Path;

use ids_core::record::SCORING_CSV_COLUMNS;

/// A categorical column's persisted `string -> integer` map plus the
/// "unseen" index used for values not present at training time.
#[derive(Debug, Clone)]
pub struct CategoricalMap {
    pub values: HashMap<String, i64>,
}

impl CategoricalMap {
    /// Looks up `value`, returning the training-time index or `|map|` for
    /// an unseen value ("keep unseen" per ml_processor.py).
    pub fn index_of(&self, value: &str) -> i64 {
        self.values
            .get(value)
            .copied()
            .unwrap_or(self.values.len() as i64)
    }
}

pub struct FeatureStore {
    pub feature_order: Vec<String>,
    pub categorical_maps: HashMap<String, CategoricalMap>,
}

/// Resolves a scoring-CSV field name to the alias the feature order may
/// use instead (`dport` -> `dsport`, matching the training schema).
fn csv_field_alias(feature_name: &str) -> &str {
    match feature_name {
        "dsport" => "dport",
        other => other,
    }
}

impl FeatureStore {
    /// `feature_order_path` is a JSON array of feature names, one of which
    /// is `{col}_index` per categorical column. `categorical_maps_dir`
    /// holds one `{col}.json` file per categorical column, each a JSON
    /// object mapping string values to their training-time integer index.
    pub fn load(feature_order_path: &str, categorical_maps_dir: &str) -> anyhow::Result<Self> {
        let feature_order: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(feature_order_path)?)?;

        let mut categorical_maps = HashMap::new();
        let dir = Path::new(categorical_maps_dir);
        if dir.is_dir() {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let column = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| anyhow::anyhow!("invalid categorical map filename: {path:?}"))?
                    .to_string();
                let values: HashMap<String, i64> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
                categorical_maps.insert(column, CategoricalMap { values });
            }
        }

        Ok(FeatureStore {
            feature_order,
            categorical_maps,
        })
    }

    pub fn num_features(&self) -> usize {
        self.feature_order.len()
    }

    /// Vectorizes one scoring-queue row (already split into
    /// [`SCORING_CSV_COLUMNS`]-ordered fields) into the model's expected
    /// feature order.
    pub fn vectorize_row(&self, fields: &[&str]) -> Vec<f32> {
        let lookup: HashMap<&str, &str> = SCORING_CSV_COLUMNS.iter().copied().zip(fields.iter().copied()).collect();

        self.feature_order
            .iter()
            .map(|feature_name| {
                if let Some(column) = feature_name.strip_suffix("_index") {
                    let map = self.categorical_maps.get(column);
                    let raw = lookup.get(column).copied().unwrap_or("-");
                    map.map(|m| m.index_of(raw) as f32).unwrap_or(0.0)
                } else {
                    let csv_name = csv_field_alias(feature_name);
                    lookup
                        .get(csv_name)
                        .and_then(|v| v.trim().parse::<f32>().ok())
                        .unwrap_or(0.0)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_categorical_value_gets_keep_index() {
        let mut values = HashMap::new();
        values.insert("tcp".to_string(), 0);
        values.insert("udp".to_string(), 1);
        let map = CategoricalMap { values };
        assert_eq!(map.index_of("tcp"), 0);
        assert_eq!(map.index_of("icmp"), 2);
    }

    #[test]
    fn vectorize_row_resolves_dport_alias_and_categoricals() {
        let mut proto_values = HashMap::new();
        proto_values.insert("tcp".to_string(), 5);
        let mut maps = HashMap::new();
        maps.insert("proto".to_string(), CategoricalMap { values: proto_values });

        let store = FeatureStore {
            feature_order: vec!["dsport".to_string(), "proto_index".to_string()],
            categorical_maps: maps,
        };

        let mut fields = vec!["-"; SCORING_CSV_COLUMNS.len()];
        let dport_idx = SCORING_CSV_COLUMNS.iter().position(|c| *c == "dport").unwrap();
        let proto_idx = SCORING_CSV_COLUMNS.iter().position(|c| *c == "proto").unwrap();
        fields[dport_idx] = "80";
        fields[proto_idx] = "tcp";

        let row = store.vectorize_row(&fields);
        assert_eq!(row, vec![80.0, 5.0]);
    }
}
