use serde::{Deserialize, Serialize};

/// Aggregate statistics for one column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub na_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub min_str_len: u32,
    pub max_str_len: u32,
    pub avg_str_len: u32,
}

/// Per-column statistics computed at ingest time, addressed by the digest of
/// the table they describe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableProfile {
    pub rows_count: u64,
    pub columns: Vec<ColumnProfile>,
}

impl TableProfile {
    /// Profiles are not content-addressed (they are keyed by their table),
    /// so JSON is an acceptable storage encoding.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("profile serializes")
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Incremental profile builder fed one row at a time during ingest.
pub struct ProfileBuilder {
    rows_count: u64,
    columns: Vec<ColumnState>,
}

struct ColumnState {
    name: String,
    na_count: u64,
    min: Option<f64>,
    max: Option<f64>,
    min_len: Option<u32>,
    max_len: u32,
    total_len: u64,
    values: u64,
}

impl ProfileBuilder {
    pub fn new(columns: &[String]) -> Self {
        ProfileBuilder {
            rows_count: 0,
            columns: columns
                .iter()
                .map(|name| ColumnState {
                    name: name.clone(),
                    na_count: 0,
                    min: None,
                    max: None,
                    min_len: None,
                    max_len: 0,
                    total_len: 0,
                    values: 0,
                })
                .collect(),
        }
    }

    pub fn add_row(&mut self, row: &[String]) {
        self.rows_count += 1;
        for (i, col) in self.columns.iter_mut().enumerate() {
            let v = row.get(i).map(String::as_str).unwrap_or("");
            if v.is_empty() {
                col.na_count += 1;
                continue;
            }
            col.values += 1;
            let len = v.len() as u32;
            col.min_len = Some(col.min_len.map_or(len, |m| m.min(len)));
            col.max_len = col.max_len.max(len);
            col.total_len += len as u64;
            if let Ok(n) = v.parse::<f64>() {
                col.min = Some(col.min.map_or(n, |m| m.min(n)));
                col.max = Some(col.max.map_or(n, |m| m.max(n)));
            }
        }
    }

    pub fn build(self) -> TableProfile {
        TableProfile {
            rows_count: self.rows_count,
            columns: self
                .columns
                .into_iter()
                .map(|c| ColumnProfile {
                    name: c.name,
                    na_count: c.na_count,
                    min: c.min,
                    max: c.max,
                    min_str_len: c.min_len.unwrap_or(0),
                    max_str_len: c.max_len,
                    avg_str_len: if c.values == 0 { 0 } else { (c.total_len / c.values) as u32 },
                })
                .collect(),
        }
    }
}
