//! Paired-image corpus, text-embedding store, dataset and batcher.
//!
//! Images are looked up in a flat directory of `*.png` files; every image is
//! conditioned on the text embedding stored under its file name.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use burn::{data::dataloader::batcher::Batcher, prelude::*, tensor::TensorData};
use walkdir::WalkDir;

use crate::{
    codec,
    error::{GanError, GanResult},
};

/// Text embeddings keyed by image file name.
#[derive(Debug, Clone)]
pub struct TextEmbeddings {
    vectors: HashMap<String, Vec<f32>>,
    dim: usize,
}

impl TextEmbeddings {
    /// Reads a JSON object mapping image file names to embedding arrays.
    ///
    /// # Errors
    ///
    /// I/O and JSON errors, and [`GanError::EmbeddingDimension`] for the first entry
    /// whose length differs from `dim`.
    pub fn load(path: &Path, dim: usize) -> GanResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| GanError::io(path, e))?;
        let vectors: HashMap<String, Vec<f32>> =
            serde_json::from_str(&text).map_err(|source| GanError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_map(vectors, dim)
    }

    /// # Errors
    ///
    /// [`GanError::EmbeddingDimension`] when an entry has the wrong length.
    pub fn from_map(vectors: HashMap<String, Vec<f32>>, dim: usize) -> GanResult<Self> {
        if let Some((key, vector)) = vectors.iter().find(|(_, v)| v.len() != dim) {
            return Err(GanError::EmbeddingDimension {
                key: key.clone(),
                expected: dim,
                actual: vector.len(),
            });
        }
        Ok(Self { vectors, dim })
    }

    pub const fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// # Errors
    ///
    /// [`GanError::MissingEmbedding`] when `key` is unknown.
    pub fn lookup(&self, key: &str) -> GanResult<&[f32]> {
        self.vectors
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| GanError::MissingEmbedding {
                key: key.to_string(),
            })
    }

    /// Looks up the embedding of an image by its file name.
    pub fn lookup_path(&self, path: &Path) -> GanResult<&[f32]> {
        self.lookup(&file_key(path))
    }
}

fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lists the `*.png` files directly inside `dir`, sorted by path.
///
/// # Errors
///
/// [`GanError::EmptyDataset`] when no image is found, I/O errors when the directory
/// cannot be read.
pub fn list_images(dir: &Path) -> GanResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            GanError::io(path, e.into())
        })?;
        let is_png = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if entry.file_type().is_file() && is_png {
            files.push(entry.into_path());
        }
    }

    if files.is_empty() {
        return Err(GanError::EmptyDataset {
            path: dir.to_path_buf(),
        });
    }
    files.sort();
    Ok(files)
}

/// One decoded image with its text embedding.
#[derive(Debug, Clone)]
pub struct TextImageItem {
    pub path: PathBuf,
    /// Channel-first pixels in `[-1, 1]`.
    pub image: Vec<f32>,
    pub text: Vec<f32>,
}

/// Images of a corpus paired with their text embeddings. Images are decoded on
/// access.
#[derive(Debug, Clone)]
pub struct TextImageDataset {
    files: Vec<PathBuf>,
    embeddings: TextEmbeddings,
    image_size: usize,
    is_crop: bool,
}

impl TextImageDataset {
    /// # Errors
    ///
    /// [`GanError::MissingEmbedding`] for the first file without an embedding.
    pub fn new(
        files: Vec<PathBuf>,
        embeddings: TextEmbeddings,
        image_size: usize,
        is_crop: bool,
    ) -> GanResult<Self> {
        for file in &files {
            embeddings.lookup_path(file)?;
        }
        Ok(Self {
            files,
            embeddings,
            image_size,
            is_crop,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub const fn embeddings(&self) -> &TextEmbeddings {
        &self.embeddings
    }

    /// Decodes the item at `index`.
    ///
    /// # Errors
    ///
    /// [`GanError::InvalidConfiguration`] for an out-of-range index, and decoder
    /// errors from the image file.
    pub fn try_get(&self, index: usize) -> GanResult<TextImageItem> {
        let path = self.files.get(index).ok_or_else(|| {
            GanError::invalid_config(format!(
                "item {index} is out of range for {} images",
                self.files.len()
            ))
        })?;
        let image = codec::load_image(path, self.image_size, self.is_crop)?;
        let text = self.embeddings.lookup_path(path)?.to_vec();

        Ok(TextImageItem {
            path: path.clone(),
            image,
            text,
        })
    }

    /// Decodes `len` consecutive items starting at `start`.
    pub fn load_range(&self, start: usize, len: usize) -> GanResult<Vec<TextImageItem>> {
        (start..start + len).map(|index| self.try_get(index)).collect()
    }
}

/// A fixed-size batch; rows past `len` are zero padding.
#[derive(Debug, Clone)]
pub struct TextImageBatch<B: Backend> {
    /// `[batch_size, c, H, 2H]`
    pub images: Tensor<B, 4>,
    /// `[batch_size, text_dim]`
    pub texts: Tensor<B, 2>,
    /// Number of real items.
    pub len: usize,
}

/// Stacks items into a [`TextImageBatch`] of exactly `batch_size` rows.
#[derive(Debug, Clone)]
pub struct TextImageBatcher {
    batch_size: usize,
    image_shape: [usize; 3],
    text_dim: usize,
}

impl TextImageBatcher {
    pub const fn new(batch_size: usize, image_shape: [usize; 3], text_dim: usize) -> Self {
        Self {
            batch_size,
            image_shape,
            text_dim,
        }
    }
}

impl<B: Backend> Batcher<B, TextImageItem, TextImageBatch<B>> for TextImageBatcher {
    /// Items beyond `batch_size` are dropped.
    fn batch(&self, items: Vec<TextImageItem>, device: &B::Device) -> TextImageBatch<B> {
        let [channels, height, width] = self.image_shape;
        let image_len = channels * height * width;
        let len = items.len().min(self.batch_size);

        let mut images = vec![0.0f32; self.batch_size * image_len];
        let mut texts = vec![0.0f32; self.batch_size * self.text_dim];
        for (row, item) in items.iter().take(len).enumerate() {
            images[row * image_len..(row + 1) * image_len].copy_from_slice(&item.image);
            texts[row * self.text_dim..(row + 1) * self.text_dim].copy_from_slice(&item.text);
        }

        let images = TensorData::new(images, [self.batch_size, channels, height, width]);
        let texts = TensorData::new(texts, [self.batch_size, self.text_dim]);

        TextImageBatch {
            images: Tensor::from_data(images.convert::<B::FloatElem>(), device),
            texts: Tensor::from_data(texts.convert::<B::FloatElem>(), device),
            len,
        }
    }
}
