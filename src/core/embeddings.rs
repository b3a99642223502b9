use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::DynamicImage;
use ndarray::{Array1, Array3};
use tokio::sync::OnceCell;

use crate::error::{AppError, Result};
#[cfg(feature = "embeddings")]
use resnet::{DIMENSION, MODEL_ID};

/// Fixed-length embedding of one image.
pub type EmbeddingVector = Array1<f32>;

/// Side length of the square model input.
pub const INPUT_SIZE: usize = 224;

/// Cells per side used by the built-in grid-pool backbone.
#[cfg(not(feature = "embeddings"))]
const GRID: usize = 8;
#[cfg(not(feature = "embeddings"))]
const MODEL_ID: &str = "grid-pool-8x8-v1";
#[cfg(not(feature = "embeddings"))]
const DIMENSION: usize = 3 * GRID * GRID;

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decode an uploaded image from its encoded bytes.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| AppError::UnsupportedImage(e.to_string()))
}

/// Resize to the model input and normalize with ImageNet statistics.
///
/// Returns a `[3, 224, 224]` channel-first array.
pub fn preprocess_image(img: &DynamicImage) -> Array3<f32> {
    let resized = img.resize_exact(
        INPUT_SIZE as u32,
        INPUT_SIZE as u32,
        image::imageops::FilterType::Triangle,
    );
    let rgb = resized.to_rgb8();

    Array3::from_shape_fn((3, INPUT_SIZE, INPUT_SIZE), |(c, y, x)| {
        let value = rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (value - MEAN[c]) / STD[c]
    })
}

/// A loaded pretrained model turning images into embeddings.
pub struct EmbeddingModel {
    #[cfg(feature = "embeddings")]
    net: std::sync::Mutex<resnet::ResNetBackbone>,
}

impl EmbeddingModel {
    /// Load the model. Expensive; call once per process.
    #[cfg(feature = "embeddings")]
    pub fn load(weights: &Path) -> Result<Self> {
        Ok(Self {
            net: std::sync::Mutex::new(resnet::ResNetBackbone::load(weights)?),
        })
    }

    /// Load the model. The grid-pool backbone has no weights.
    #[cfg(not(feature = "embeddings"))]
    pub fn load(_weights: &Path) -> Result<Self> {
        Ok(Self {})
    }

    /// Identifier of the backbone in use.
    pub fn model_id(&self) -> &'static str {
        MODEL_ID
    }

    /// Length of the vectors this model produces.
    pub fn dimension(&self) -> usize {
        DIMENSION
    }

    /// Compute an embedding for a decoded image.
    pub fn compute_embedding(&self, img: &DynamicImage) -> Result<EmbeddingVector> {
        self.forward(preprocess_image(img))
    }

    #[cfg(feature = "embeddings")]
    fn forward(&self, input: Array3<f32>) -> Result<EmbeddingVector> {
        let net = self
            .net
            .lock()
            .map_err(|_| AppError::EmbeddingFailed("model lock poisoned".to_string()))?;
        net.forward(input)
    }

    #[cfg(not(feature = "embeddings"))]
    fn forward(&self, input: Array3<f32>) -> Result<EmbeddingVector> {
        Ok(grid_pool(&input))
    }
}

impl fmt::Debug for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingModel")
            .field("model_id", &self.model_id())
            .finish()
    }
}

/// Average each channel over a `GRID x GRID` layout of cells.
#[cfg(not(feature = "embeddings"))]
fn grid_pool(input: &Array3<f32>) -> EmbeddingVector {
    let cell = INPUT_SIZE / GRID;
    let mut sums = vec![0.0f32; DIMENSION];

    for ((c, y, x), value) in input.indexed_iter() {
        let (gy, gx) = (y / cell, x / cell);
        if gy < GRID && gx < GRID {
            sums[(c * GRID + gy) * GRID + gx] += value;
        }
    }

    let area = (cell * cell) as f32;
    sums.iter().map(|sum| sum / area).collect()
}

#[cfg(feature = "embeddings")]
mod resnet {
    use std::path::Path;

    use ndarray::Array3;
    use tch::{nn, Device, Kind, Tensor};

    use super::{EmbeddingVector, INPUT_SIZE};
    use crate::error::{AppError, Result};

    pub(super) const MODEL_ID: &str = "resnet50-imagenet";
    pub(super) const DIMENSION: usize = 2048;

    /// ResNet-50 with the classification layer removed.
    pub(super) struct ResNetBackbone {
        _vs: nn::VarStore,
        net: nn::FuncT<'static>,
        device: Device,
    }

    impl ResNetBackbone {
        pub(super) fn load(weights: &Path) -> Result<Self> {
            if !weights.exists() {
                return Err(AppError::EmbeddingFailed(format!(
                    "embedding weights not found at {}",
                    weights.display()
                )));
            }
            let device = Device::cuda_if_available();
            let mut vs = nn::VarStore::new(device);
            let net = tch::vision::resnet::resnet50_no_final_layer(&vs.root());
            vs.load(weights).map_err(|e| {
                AppError::EmbeddingFailed(format!(
                    "cannot load weights from {}: {}",
                    weights.display(),
                    e
                ))
            })?;

            Ok(Self {
                _vs: vs,
                net,
                device,
            })
        }

        pub(super) fn forward(&self, input: Array3<f32>) -> Result<EmbeddingVector> {
            let size = INPUT_SIZE as i64;
            let tensor = Tensor::of_slice(&input.into_raw_vec())
                .reshape(&[1, 3, size, size])
                .to_kind(Kind::Float)
                .to_device(self.device);

            let output = tch::no_grad(|| tensor.apply_t(&self.net, false));
            let embedding = Vec::<f32>::try_from(output.to_device(Device::Cpu).view([-1]))?;

            if embedding.len() != DIMENSION {
                return Err(AppError::EmbeddingFailed(format!(
                    "unexpected embedding length {}",
                    embedding.len()
                )));
            }
            Ok(EmbeddingVector::from(embedding))
        }
    }
}

/// Process-wide owner of the embedding model.
///
/// The model is loaded lazily on the first `embed` call and then reused.
/// Concurrent first calls wait on a single load.
pub struct EmbeddingProvider {
    weights_path: PathBuf,
    timeout: Duration,
    model: OnceCell<Arc<EmbeddingModel>>,
    loads: AtomicUsize,
}

impl EmbeddingProvider {
    /// Creates a provider; nothing is loaded until first use.
    pub fn new(weights_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            weights_path: weights_path.into(),
            timeout,
            model: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// The shared model, loading it on first access.
    pub async fn model(&self) -> Result<Arc<EmbeddingModel>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let path = self.weights_path.clone();
                let started = std::time::Instant::now();
                let model =
                    tokio::task::spawn_blocking(move || EmbeddingModel::load(&path)).await??;
                self.loads.fetch_add(1, Ordering::SeqCst);
                log::info!(
                    "Loaded embedding model {} ({}-d) in {:?}",
                    model.model_id(),
                    model.dimension(),
                    started.elapsed()
                );
                Ok::<_, AppError>(Arc::new(model))
            })
            .await?;
        Ok(Arc::clone(model))
    }

    /// Whether the model has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// How many times the model has been loaded (at most one).
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Decode `bytes` and compute its embedding, bounded by the configured timeout.
    pub async fn embed(&self, bytes: Bytes) -> Result<EmbeddingVector> {
        let model = self.model().await?;
        let task = tokio::task::spawn_blocking(move || {
            let img = decode_image(&bytes)?;
            model.compute_embedding(&img)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(AppError::EmbeddingFailed(format!(
                "inference timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

impl fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("weights_path", &self.weights_path)
            .field("timeout", &self.timeout)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, RgbImage};
    use std::io::Cursor;

    fn gradient_png(width: u32, height: u32, blue: u8) -> Bytes {
        let mut imgbuf = RgbImage::new(width, height);
        for (x, y, pixel) in imgbuf.enumerate_pixels_mut() {
            *pixel = image::Rgb([
                (x as f32 * 255.0 / width as f32) as u8,
                (y as f32 * 255.0 / height as f32) as u8,
                blue,
            ]);
        }
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(imgbuf)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    fn provider() -> EmbeddingProvider {
        EmbeddingProvider::new("resnet50.ot", Duration::from_secs(30))
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 7, image::Rgb([255, 0, 0])));
        let input = preprocess_image(&img);
        assert_eq!(input.shape(), &[3, INPUT_SIZE, INPUT_SIZE]);
        assert!((input[[0, 0, 0]] - (1.0 - MEAN[0]) / STD[0]).abs() < 1e-5);
        assert!((input[[1, 100, 100]] - (-MEAN[1] / STD[1])).abs() < 1e-5);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(AppError::UnsupportedImage(_))
        ));
    }

    #[cfg(feature = "embeddings")]
    #[test]
    fn test_load_without_weights_fails() {
        let err = EmbeddingModel::load(Path::new("missing/resnet50.ot")).unwrap_err();
        assert!(matches!(err, AppError::EmbeddingFailed(_)));
    }

    #[cfg(feature = "embeddings")]
    #[tokio::test]
    async fn test_failed_load_leaves_provider_unloaded() {
        let provider = EmbeddingProvider::new("missing/resnet50.ot", Duration::from_secs(30));
        let png = gradient_png(16, 16, 0);

        for _ in 0..2 {
            let err = provider.embed(png.clone()).await.unwrap_err();
            assert!(matches!(err, AppError::EmbeddingFailed(_)));
        }
        assert!(!provider.is_loaded());
        assert_eq!(provider.load_count(), 0);
    }

    #[cfg(not(feature = "embeddings"))]
    #[test]
    fn test_grid_pool_matches_cell_means() {
        let mut input = Array3::<f32>::zeros((3, INPUT_SIZE, INPUT_SIZE));
        let cell = INPUT_SIZE / GRID;
        // Fill the top-left cell of the green channel with 2.0 and half of the next one.
        for y in 0..cell {
            for x in 0..cell + cell / 2 {
                input[[1, y, x]] = 2.0;
            }
        }
        let pooled = grid_pool(&input);
        assert_eq!(pooled.len(), DIMENSION);
        assert!((pooled[GRID * GRID] - 2.0).abs() < 1e-6);
        assert!((pooled[GRID * GRID + 1] - 1.0).abs() < 1e-6);
        assert_eq!(pooled[0], 0.0);
    }

    #[cfg(not(feature = "embeddings"))]
    #[test]
    fn test_grid_pool_dimension() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, image::Rgb([10, 200, 30])));
        let model = EmbeddingModel::load(Path::new("unused")).unwrap();
        let embedding = model.compute_embedding(&img).unwrap();
        assert_eq!(embedding.len(), model.dimension());
        assert_eq!(embedding.len(), 192);
    }

    #[cfg(not(feature = "embeddings"))]
    #[tokio::test]
    async fn test_embed_is_deterministic() {
        let provider = provider();
        let png = gradient_png(40, 30, 128);
        let first = provider.embed(png.clone()).await.unwrap();
        let second = provider.embed(png).await.unwrap();
        assert_eq!(first, second);
    }

    #[cfg(not(feature = "embeddings"))]
    #[tokio::test]
    async fn test_model_loaded_once() {
        let provider = Arc::new(provider());
        assert!(!provider.is_loaded());

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let provider = Arc::clone(&provider);
            handles.push(tokio::spawn(async move {
                provider.embed(gradient_png(16, 16, i * 20)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(provider.is_loaded());
        assert_eq!(provider.load_count(), 1);
    }

    #[cfg(not(feature = "embeddings"))]
    #[tokio::test]
    async fn test_embed_unsupported_image() {
        let provider = provider();
        let err = provider
            .embed(Bytes::from_static(b"GIF87a-truncated"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedImage(_)));
        // A bad upload does not poison the shared model.
        assert!(provider.is_loaded());
    }
}
