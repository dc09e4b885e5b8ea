//! On-disk parameter snapshots.
//!
//! A checkpoint directory holds one named MessagePack record per network and
//! optimizer for every saved step (`generator-<step>.mpk`, `optim_d-<step>.mpk`, ...)
//! and a `checkpoint.json` manifest listing the retained steps.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    module::Module,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder, RecorderError},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GanError, GanResult};

const MANIFEST_FILE: &str = "checkpoint.json";
const RECORD_EXTENSION: &str = "mpk";

type FileRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Contents of `checkpoint.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    /// Most recently committed step.
    pub latest: usize,
    /// Retained steps, oldest first.
    pub steps: Vec<usize>,
    /// Epoch the latest step belongs to.
    pub epoch: usize,
}

/// A directory of step-numbered snapshots.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    max_to_keep: usize,
    recorder: FileRecorder,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, max_to_keep: usize) -> Self {
        Self {
            dir: dir.into(),
            max_to_keep,
            recorder: FileRecorder::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a record without its extension, the form burn's file recorders take.
    fn record_stem(&self, name: &str, step: usize) -> PathBuf {
        self.dir.join(format!("{name}-{step}"))
    }

    /// Full path of a record file.
    pub fn record_path(&self, name: &str, step: usize) -> PathBuf {
        self.record_stem(name, step).with_extension(RECORD_EXTENSION)
    }

    /// Reads the manifest, `None` when the directory holds no checkpoint.
    ///
    /// # Errors
    ///
    /// I/O and JSON errors of an existing manifest.
    pub fn manifest(&self) -> GanResult<Option<CheckpointManifest>> {
        let path = self.dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| GanError::io(&path, e))?;
        let manifest = serde_json::from_str(&text).map_err(|source| GanError::Json { path, source })?;
        Ok(Some(manifest))
    }

    pub fn latest_step(&self) -> GanResult<Option<usize>> {
        Ok(self.manifest()?.map(|manifest| manifest.latest))
    }

    fn ensure_dir(&self) -> GanResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| GanError::io(&self.dir, e))
    }

    fn record_error(&self, name: &str, step: usize, error: RecorderError) -> GanError {
        GanError::Record {
            path: self.record_path(name, step),
            reason: error.to_string(),
        }
    }

    /// Writes `module` as `<name>-<step>.mpk`.
    pub fn save_module<B: Backend, M: Module<B>>(
        &self,
        name: &str,
        step: usize,
        module: M,
    ) -> GanResult<()> {
        self.ensure_dir()?;
        module
            .save_file(self.record_stem(name, step), &self.recorder)
            .map_err(|e| self.record_error(name, step, e))
    }

    /// Loads `<name>-<step>.mpk` into `module`.
    ///
    /// # Errors
    ///
    /// [`GanError::CheckpointNotFound`] when the file is absent, [`GanError::Record`]
    /// when it cannot be decoded into `module`.
    pub fn load_module<B: Backend, M: Module<B>>(
        &self,
        name: &str,
        step: usize,
        module: M,
        device: &B::Device,
    ) -> GanResult<M> {
        self.require(name, step)?;
        module
            .load_file(self.record_stem(name, step), &self.recorder, device)
            .map_err(|e| self.record_error(name, step, e))
    }

    /// Writes an arbitrary record, such as an optimizer state.
    pub fn save_record<B: Backend, R: Record<B>>(
        &self,
        name: &str,
        step: usize,
        record: R,
    ) -> GanResult<()> {
        self.ensure_dir()?;
        <FileRecorder as Recorder<B>>::record(&self.recorder, record, self.record_stem(name, step))
            .map_err(|e| self.record_error(name, step, e))
    }

    pub fn load_record<B: Backend, R: Record<B>>(
        &self,
        name: &str,
        step: usize,
        device: &B::Device,
    ) -> GanResult<R> {
        self.require(name, step)?;
        <FileRecorder as Recorder<B>>::load(&self.recorder, self.record_stem(name, step), device)
            .map_err(|e| self.record_error(name, step, e))
    }

    fn require(&self, name: &str, step: usize) -> GanResult<()> {
        let path = self.record_path(name, step);
        if path.exists() {
            Ok(())
        } else {
            Err(GanError::CheckpointNotFound { path })
        }
    }

    /// Records `step` as the latest snapshot and deletes the oldest snapshots beyond
    /// `max_to_keep`. Files that cannot be deleted are logged and left behind.
    pub fn commit(&self, step: usize, epoch: usize) -> GanResult<CheckpointManifest> {
        self.ensure_dir()?;
        let mut steps = self.manifest()?.map(|m| m.steps).unwrap_or_default();
        steps.retain(|s| *s != step);
        steps.push(step);

        let excess = steps.len().saturating_sub(self.max_to_keep);
        for old in steps.drain(..excess) {
            self.remove_step(old);
        }

        let manifest = CheckpointManifest {
            latest: step,
            steps,
            epoch,
        };
        let path = self.dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest).map_err(|source| GanError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|e| GanError::io(&path, e))?;

        debug!(step, epoch, retained = manifest.steps.len(), "Committed checkpoint");
        Ok(manifest)
    }

    fn remove_step(&self, step: usize) {
        let suffix = format!("-{step}.{RECORD_EXTENSION}");
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(dir = %self.dir.display(), %error, "Cannot prune checkpoints");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let matches = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().ends_with(&suffix));
            if matches {
                if let Err(error) = fs::remove_file(&path) {
                    warn!(path = %path.display(), %error, "Cannot remove old checkpoint");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeneratorConfig, NormMode};
    use burn::{backend::ndarray::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn empty_directory_has_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3);
        assert_eq!(store.latest_step().unwrap(), None);
    }

    #[test]
    fn missing_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3);
        let device = Default::default();
        let generator = GeneratorConfig::new(8, 4, 3, 4, 2).init::<TestBackend>(&device);

        match store.load_module::<TestBackend, _>("generator", 7, generator, &device) {
            Err(GanError::CheckpointNotFound { path }) => {
                assert!(path.ends_with("generator-7.mpk"));
            }
            other => panic!("Expected CheckpointNotFound error, got {other:?}"),
        }
    }

    #[test]
    fn module_round_trip_preserves_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 3);
        let device = Default::default();
        let config = GeneratorConfig::new(8, 4, 3, 4, 2);
        let saved = config.init::<TestBackend>(&device);

        store.save_module::<TestBackend, _>("generator", 5, saved.clone()).unwrap();
        let loaded = store
            .load_module::<TestBackend, _>("generator", 5, config.init(&device), &device)
            .unwrap();

        let z = Tensor::random([2, 4], Distribution::Uniform(-1.0, 1.0), &device);
        let t = Tensor::random([2, 3], Distribution::Normal(0.0, 1.0), &device);
        let expected = saved.forward(z.clone(), t.clone(), NormMode::Inference);
        let actual = loaded.forward(z, t, NormMode::Inference);
        actual.into_data().assert_eq(&expected.into_data(), true);
    }

    #[test]
    fn commit_prunes_oldest_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 2);
        let device = Default::default();
        let generator = GeneratorConfig::new(8, 4, 3, 4, 2).init::<TestBackend>(&device);

        for step in [10, 20, 30] {
            store.save_module::<TestBackend, _>("generator", step, generator.clone()).unwrap();
            store.commit(step, step / 10).unwrap();
        }

        let manifest = store.manifest().unwrap().unwrap();
        assert_eq!(manifest.latest, 30);
        assert_eq!(manifest.steps, vec![20, 30]);
        assert_eq!(manifest.epoch, 3);
        assert!(!store.record_path("generator", 10).exists());
        assert!(store.record_path("generator", 20).exists());
        assert!(store.record_path("generator", 30).exists());
    }
}
