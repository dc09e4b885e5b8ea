//! Image file codec.
//!
//! Decodes paired images into channel-first `f32` pixels in `[-1, 1]` and writes
//! tensor batches back to disk as a single grid PNG.

use std::path::Path;

use burn::tensor::{backend::Backend, DType, Tensor};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};

use crate::error::{GanError, GanResult};

/// Images per grid row.
pub const GRID_COLUMNS: usize = 8;

/// Loads `path` as `[3, image_size, 2 * image_size]` pixels normalized to `[-1, 1]`.
///
/// With `is_crop`, the largest centered region of width/height ratio 2 is cut out
/// before resizing; otherwise the whole image is stretched.
///
/// # Errors
///
/// Returns [`GanError::ImageOpenFailed`] when the file cannot be decoded.
pub fn load_image(path: &Path, image_size: usize, is_crop: bool) -> GanResult<Vec<f32>> {
    let img = image::open(path).map_err(|source| GanError::ImageOpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let img = if is_crop { center_crop(img) } else { img };

    let height = image_size as u32;
    let resized = img.resize_exact(height * 2, height, FilterType::Triangle);
    Ok(normalize_chw(resized))
}

fn center_crop(img: DynamicImage) -> DynamicImage {
    let (width, height) = img.dimensions();
    let (crop_w, crop_h) = if width >= height * 2 {
        (height * 2, height)
    } else {
        (width, (width / 2).max(1))
    };
    img.crop_imm((width - crop_w) / 2, (height - crop_h) / 2, crop_w, crop_h)
}

/// HWC `[0, 1]` pixels to CHW `[-1, 1]`.
fn normalize_chw(img: DynamicImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let (width, height) = (width as usize, height as usize);
    let hwc = img.into_rgb32f().into_raw();

    let mut chw = vec![0.0; hwc.len()];
    for y in 0..height {
        for x in 0..width {
            for c in 0..3 {
                chw[(c * height + y) * width + x] = hwc[(y * width + x) * 3 + c] * 2.0 - 1.0;
            }
        }
    }
    chw
}

/// `[rows, columns]` of the grid that holds `count` images, [`GRID_COLUMNS`] per row.
pub const fn grid_shape(count: usize) -> [usize; 2] {
    [count.div_ceil(GRID_COLUMNS), GRID_COLUMNS]
}

/// Writes a `[N, C, H, W]` batch in `[-1, 1]` as one PNG grid of `rows × columns`
/// cells, creating the parent directory when needed. Unused cells stay black.
///
/// # Errors
///
/// Returns [`GanError::InvalidImageTensor`] when the batch does not fit the grid or
/// has neither 1 nor 3 channels, and I/O or encoder errors from writing the file.
pub fn save_grid<B: Backend>(images: Tensor<B, 4>, grid: [usize; 2], path: &Path) -> GanResult<()> {
    let [count, channels, height, width] = images.dims();
    let [rows, columns] = grid;

    if count > rows * columns {
        return Err(GanError::InvalidImageTensor {
            reason: format!("{count} images do not fit a {rows}x{columns} grid"),
        });
    }
    if channels != 1 && channels != 3 {
        return Err(GanError::InvalidImageTensor {
            reason: format!("expected 1 or 3 channels, got {channels}"),
        });
    }

    let data = images
        .into_data()
        .convert_dtype(DType::F32)
        .to_vec::<f32>()
        .map_err(|e| GanError::InvalidImageTensor {
            reason: format!("{e:?}"),
        })?;

    let mut canvas = RgbImage::new((columns * width) as u32, (rows * height) as u32);
    for n in 0..count {
        let (row, column) = (n / columns, n % columns);
        for y in 0..height {
            for x in 0..width {
                let pixel = |c: usize| {
                    let c = if channels == 1 { 0 } else { c };
                    let v = data[((n * channels + c) * height + y) * width + x];
                    ((v + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
                };
                canvas.put_pixel(
                    (column * width + x) as u32,
                    (row * height + y) as u32,
                    Rgb([pixel(0), pixel(1), pixel(2)]),
                );
            }
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GanError::io(parent, e))?;
    }
    canvas.save(path).map_err(|source| GanError::ImageSaveFailed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::ndarray::NdArray, tensor::TensorData};

    type TestBackend = NdArray<f32>;

    #[test]
    fn grid_has_eight_columns() {
        assert_eq!(grid_shape(1), [1, 8]);
        assert_eq!(grid_shape(8), [1, 8]);
        assert_eq!(grid_shape(9), [2, 8]);
        assert_eq!(grid_shape(64), [8, 8]);
    }

    #[test]
    fn saved_grid_loads_back_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("grid.png");
        let device = Default::default();

        // One 4x8 image, white on the left half and black on the right half.
        let values: Vec<f32> = (0..3 * 4 * 8)
            .map(|i| if i % 8 < 4 { 1.0 } else { -1.0 })
            .collect();
        let images = Tensor::<TestBackend, 4>::from_data(TensorData::new(values, [1, 3, 4, 8]), &device);

        save_grid(images, grid_shape(1), &path).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.dimensions(), (64, 4));

        // The first cell of the grid, resized onto itself.
        let cell = decoded.crop_imm(0, 0, 8, 4);
        let cell_path = dir.path().join("cell.png");
        cell.save(&cell_path).unwrap();

        let pixels = load_image(&cell_path, 4, false).unwrap();
        assert_eq!(pixels.len(), 3 * 4 * 8);
        assert!((pixels[0] - 1.0).abs() < 1e-2);
        assert!((pixels[7] + 1.0).abs() < 1e-2);
    }

    #[test]
    fn batch_larger_than_grid_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::zeros([3, 3, 2, 4], &device);

        let result = save_grid(images, [1, 2], &dir.path().join("grid.png"));
        assert!(matches!(result, Err(GanError::InvalidImageTensor { .. })));
    }

    #[test]
    fn crop_keeps_paired_aspect_ratio() {
        let wide = DynamicImage::new_rgb8(50, 10);
        assert_eq!(center_crop(wide).dimensions(), (20, 10));

        let tall = DynamicImage::new_rgb8(20, 30);
        assert_eq!(center_crop(tall).dimensions(), (20, 10));
    }

    #[test]
    fn missing_file_is_reported() {
        let result = load_image(Path::new("does/not/exist.png"), 8, false);
        assert!(matches!(result, Err(GanError::ImageOpenFailed { .. })));
    }
}
