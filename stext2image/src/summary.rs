//! Training summaries.
//!
//! The trainer reports loss scalars, value histograms and generated image batches
//! through a [`SummarySink`]. [`JsonlSummary`] appends one JSON object per
//! observation to `summary.jsonl`; [`NullSummary`] drops everything.

use std::{
    fs::{self, File, OpenOptions},
    io::{LineWriter, Write},
    path::{Path, PathBuf},
};

use burn::tensor::{backend::Backend, Tensor};
use serde_json::{json, Value};

use crate::{
    codec,
    error::{GanError, GanResult},
};

/// Number of equal-width buckets of a histogram entry.
pub const HISTOGRAM_BUCKETS: usize = 10;

/// Receiver of training observations.
pub trait SummarySink {
    fn scalar(&mut self, tag: &str, step: usize, value: f64) -> GanResult<()>;

    fn histogram(&mut self, tag: &str, step: usize, values: &[f32]) -> GanResult<()>;

    /// Records a `[N, C, H, W]` image batch in `[-1, 1]`.
    fn images<B: Backend>(&mut self, tag: &str, step: usize, batch: Tensor<B, 4>) -> GanResult<()>;
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSummary;

impl SummarySink for NullSummary {
    fn scalar(&mut self, _tag: &str, _step: usize, _value: f64) -> GanResult<()> {
        Ok(())
    }

    fn histogram(&mut self, _tag: &str, _step: usize, _values: &[f32]) -> GanResult<()> {
        Ok(())
    }

    fn images<B: Backend>(&mut self, _tag: &str, _step: usize, _batch: Tensor<B, 4>) -> GanResult<()> {
        Ok(())
    }
}

/// Appends observations to `<dir>/summary.jsonl` and writes image batches as grid
/// PNGs into the same directory.
#[derive(Debug)]
pub struct JsonlSummary {
    dir: PathBuf,
    path: PathBuf,
    writer: LineWriter<File>,
}

impl JsonlSummary {
    /// Opens (or creates) `<dir>/summary.jsonl` for appending.
    pub fn create(dir: impl Into<PathBuf>) -> GanResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| GanError::io(&dir, e))?;

        let path = dir.join("summary.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| GanError::io(&path, e))?;

        Ok(Self {
            dir,
            path,
            writer: LineWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, entry: Value) -> GanResult<()> {
        let line = serde_json::to_string(&entry).map_err(|source| GanError::Json {
            path: self.path.clone(),
            source,
        })?;
        writeln!(self.writer, "{line}").map_err(|e| GanError::io(&self.path, e))
    }
}

impl SummarySink for JsonlSummary {
    fn scalar(&mut self, tag: &str, step: usize, value: f64) -> GanResult<()> {
        self.append(json!({ "step": step, "tag": tag, "kind": "scalar", "value": value }))
    }

    fn histogram(&mut self, tag: &str, step: usize, values: &[f32]) -> GanResult<()> {
        let stats = Histogram::from_values(values);
        self.append(json!({
            "step": step,
            "tag": tag,
            "kind": "histogram",
            "count": values.len(),
            "min": stats.min,
            "max": stats.max,
            "mean": stats.mean,
            "buckets": stats.buckets,
        }))
    }

    fn images<B: Backend>(&mut self, tag: &str, step: usize, batch: Tensor<B, 4>) -> GanResult<()> {
        let [count, ..] = batch.dims();
        let file = format!("{tag}_{step:06}.png");
        codec::save_grid(batch, codec::grid_shape(count), &self.dir.join(&file))?;

        self.append(json!({ "step": step, "tag": tag, "kind": "images", "count": count, "file": file }))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Histogram {
    min: f32,
    max: f32,
    mean: f64,
    buckets: Vec<usize>,
}

impl Histogram {
    fn from_values(values: &[f32]) -> Self {
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let (min, max) = finite
            .clone()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let (sum, count) = finite.fold((0.0f64, 0usize), |(s, n), v| (s + f64::from(v), n + 1));

        let mut buckets = vec![0; HISTOGRAM_BUCKETS];
        if count == 0 {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                buckets,
            };
        }

        let width = (max - min) / HISTOGRAM_BUCKETS as f32;
        for v in values.iter().filter(|v| v.is_finite()) {
            let index = if width > 0.0 {
                (((v - min) / width) as usize).min(HISTOGRAM_BUCKETS - 1)
            } else {
                0
            };
            buckets[index] += 1;
        }

        Self {
            min,
            max,
            mean: sum / count as f64,
            buckets,
        }
    }
}
