//! Tabular results and their cache blob encoding.
//!
//! Blob layout: one tag byte (`1` single, `2` paired). A single result is
//! followed by one Parquet-encoded frame. A paired result is followed by the
//! little-endian `u64` byte length of the calls frame, the calls frame, then
//! the puts frame.

use crate::error::IngestError;
use polars::prelude::*;
use std::fmt;
use std::io::Cursor;

const TAG_SINGLE: u8 = 1;
const TAG_PAIRED: u8 = 2;

/// Row and column counts of a fetched result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rows x {} columns", self.rows, self.cols)
    }
}

impl Shape {
    pub fn of(df: &DataFrame) -> Self {
        Self {
            rows: df.height(),
            cols: df.width(),
        }
    }
}

/// Which variant a data kind produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Single,
    Paired,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultKind::Single => f.write_str("single"),
            ResultKind::Paired => f.write_str("paired"),
        }
    }
}

/// A fetched dataset: one frame (price bars, yields) or a calls/puts pair.
#[derive(Debug, Clone)]
pub enum TabularResult {
    Single(DataFrame),
    Paired { calls: DataFrame, puts: DataFrame },
}

impl TabularResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            TabularResult::Single(_) => ResultKind::Single,
            TabularResult::Paired { .. } => ResultKind::Paired,
        }
    }

    /// Paired results report summed rows and the wider side's column count.
    pub fn shape(&self) -> Shape {
        match self {
            TabularResult::Single(df) => Shape::of(df),
            TabularResult::Paired { calls, puts } => Shape {
                rows: calls.height() + puts.height(),
                cols: calls.width().max(puts.width()),
            },
        }
    }

    pub fn into_single(self) -> Option<DataFrame> {
        match self {
            TabularResult::Single(df) => Some(df),
            TabularResult::Paired { .. } => None,
        }
    }

    pub fn into_paired(self) -> Option<(DataFrame, DataFrame)> {
        match self {
            TabularResult::Paired { calls, puts } => Some((calls, puts)),
            TabularResult::Single(_) => None,
        }
    }

    /// Serialize for storage.
    pub fn encode(&self) -> Result<Vec<u8>, IngestError> {
        let mut out = Vec::new();
        match self {
            TabularResult::Single(df) => {
                out.push(TAG_SINGLE);
                out.extend_from_slice(&frame_to_parquet(df)?);
            }
            TabularResult::Paired { calls, puts } => {
                let calls = frame_to_parquet(calls)?;
                let puts = frame_to_parquet(puts)?;
                out.reserve(1 + 8 + calls.len() + puts.len());
                out.push(TAG_PAIRED);
                out.extend_from_slice(&(calls.len() as u64).to_le_bytes());
                out.extend_from_slice(&calls);
                out.extend_from_slice(&puts);
            }
        }
        Ok(out)
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(blob: &[u8]) -> Result<Self, IngestError> {
        let (&tag, body) = blob
            .split_first()
            .ok_or_else(|| IngestError::Cache("empty payload blob".into()))?;

        match tag {
            TAG_SINGLE => Ok(TabularResult::Single(parquet_to_frame(body)?)),
            TAG_PAIRED => {
                if body.len() < 8 {
                    return Err(IngestError::Cache("truncated paired payload header".into()));
                }
                let (len_bytes, frames) = body.split_at(8);
                let mut len = [0u8; 8];
                len.copy_from_slice(len_bytes);
                let calls_len = usize::try_from(u64::from_le_bytes(len))
                    .map_err(|_| IngestError::Cache("paired payload length overflow".into()))?;
                if calls_len > frames.len() {
                    return Err(IngestError::Cache(format!(
                        "truncated paired payload: calls frame needs {calls_len} bytes, {} available",
                        frames.len()
                    )));
                }
                let (calls, puts) = frames.split_at(calls_len);
                Ok(TabularResult::Paired {
                    calls: parquet_to_frame(calls)?,
                    puts: parquet_to_frame(puts)?,
                })
            }
            other => Err(IngestError::Cache(format!("unknown payload tag {other}"))),
        }
    }
}

fn frame_to_parquet(df: &DataFrame) -> Result<Vec<u8>, IngestError> {
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut df.clone())
        .map_err(|e| IngestError::Cache(format!("write parquet: {e}")))?;
    Ok(buf)
}

fn parquet_to_frame(bytes: &[u8]) -> Result<DataFrame, IngestError> {
    ParquetReader::new(Cursor::new(bytes))
        .finish()
        .map_err(|e| IngestError::Cache(format!("read parquet: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars() -> DataFrame {
        DataFrame::new(vec![
            Column::new("open".into(), vec![100.0, 101.0, 102.5]),
            Column::new("close".into(), vec![101.0, 100.5, 103.0]),
            Column::new("volume".into(), vec![1000i64, 1200, 900]),
        ])
        .unwrap()
    }

    fn side(strikes: Vec<f64>) -> DataFrame {
        let n = strikes.len();
        DataFrame::new(vec![
            Column::new("strike".into(), strikes),
            Column::new("last".into(), vec![1.5; n]),
        ])
        .unwrap()
    }

    #[test]
    fn single_roundtrip_preserves_frame() {
        let original = TabularResult::Single(bars());
        let decoded = TabularResult::decode(&original.encode().unwrap()).unwrap();
        let df = decoded.into_single().unwrap();
        assert!(df.equals(&bars()));
    }

    #[test]
    fn paired_roundtrip_keeps_sides_apart() {
        let original = TabularResult::Paired {
            calls: side(vec![90.0, 100.0, 110.0]),
            puts: side(vec![95.0]),
        };
        let blob = original.encode().unwrap();
        assert_eq!(blob[0], TAG_PAIRED);

        let (calls, puts) = TabularResult::decode(&blob).unwrap().into_paired().unwrap();
        assert_eq!(calls.height(), 3);
        assert_eq!(puts.height(), 1);
        assert!(puts.equals(&side(vec![95.0])));
    }

    #[test]
    fn paired_shape_sums_rows() {
        let result = TabularResult::Paired {
            calls: side(vec![1.0, 2.0]),
            puts: side(vec![3.0]),
        };
        assert_eq!(result.shape(), Shape { rows: 3, cols: 2 });
        assert_eq!(result.kind(), ResultKind::Paired);
    }

    #[test]
    fn rejects_unknown_tag_and_truncation() {
        assert!(TabularResult::decode(&[]).is_err());
        assert!(TabularResult::decode(&[9, 1, 2, 3]).is_err());
        assert!(TabularResult::decode(&[TAG_PAIRED, 1, 2]).is_err());

        let mut blob = vec![TAG_PAIRED];
        blob.extend_from_slice(&1000u64.to_le_bytes());
        blob.extend_from_slice(&[0u8; 10]);
        let err = TabularResult::decode(&blob).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn shape_display() {
        assert_eq!(Shape { rows: 5, cols: 2 }.to_string(), "5 rows x 2 columns");
    }
}
