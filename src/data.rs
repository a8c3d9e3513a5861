use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Int, Tensor, TensorData},
};
use image::{imageops::FilterType, ImageReader};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::{ClassifierError, Result};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const VALID_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    pub image_path: PathBuf,
    pub label: usize,
}

/// Images laid out as `<root>/<class label>/<file>`; the label index is the
/// position of the directory name in the configured label list.
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    pub items: Vec<ImageItem>,
}

impl ImageFolderDataset {
    pub fn new<P: AsRef<Path>>(root: P, class_labels: &[String]) -> Result<Self> {
        let root = root.as_ref();
        tracing::info!(root = %root.display(), classes = class_labels.len(), "scanning image folder");

        let mut items = Vec::new();
        for (label, name) in class_labels.iter().enumerate() {
            let class_dir = root.join(name);
            if !class_dir.is_dir() {
                tracing::warn!(class = %name, dir = %class_dir.display(), "no directory for class");
                continue;
            }

            let files = Self::collect_image_files(&class_dir)?;
            tracing::debug!(class = %name, images = files.len(), "class directory scanned");
            items.extend(files.into_iter().map(|image_path| ImageItem { image_path, label }));
        }

        if items.is_empty() {
            return Err(ClassifierError::Dataset(format!(
                "no images found under {}",
                root.display()
            )));
        }

        items.sort_by(|a, b| a.image_path.cmp(&b.image_path));
        tracing::info!(images = items.len(), "image folder loaded");

        Ok(Self { items })
    }

    pub fn from_items(items: Vec<ImageItem>) -> Self {
        Self { items }
    }

    fn collect_image_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dirs = vec![dir.to_path_buf()];

        while let Some(current_dir) = dirs.pop() {
            for entry in fs::read_dir(&current_dir)? {
                let path = entry?.path();

                if path.is_dir() {
                    dirs.push(path);
                } else if let Some(ext) = path.extension() {
                    let ext = ext.to_string_lossy().to_lowercase();
                    if VALID_EXTENSIONS.iter().any(|&e| e == ext) {
                        files.push(path);
                    }
                }
            }
        }
        Ok(files)
    }

    /// Seeded shuffle, then the first `ratio` of items go to the first half.
    pub fn split(&self, ratio: f64, seed: u64) -> (Self, Self) {
        let mut items = self.items.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        items.shuffle(&mut rng);

        let split_index = (items.len() as f64 * ratio) as usize;
        let valid_items = items.split_off(split_index);

        tracing::info!(train = items.len(), valid = valid_items.len(), ratio, "dataset split");

        (Self { items }, Self { items: valid_items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Decode, resize to `size x size`, normalize with ImageNet statistics, CHW layout.
pub fn load_and_preprocess_image(path: &Path, size: usize) -> Result<Vec<f32>> {
    let img = ImageReader::open(path)
        .map_err(|e| ClassifierError::Image(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| ClassifierError::Image(path.to_path_buf(), e.to_string()))?
        .resize_exact(size as u32, size as u32, FilterType::Triangle);

    let raw_pixels = img.to_rgb8().into_raw();
    let frame_size = size * size;
    let mut chw_data = vec![0.0; frame_size * 3];

    for i in 0..frame_size {
        for c in 0..3 {
            let value = raw_pixels[i * 3 + c] as f32 / 255.0;
            chw_data[i + c * frame_size] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    Ok(chw_data)
}

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn new(images: Tensor<B, 4>, targets: Tensor<B, 1, Int>) -> Self {
        Self { images, targets }
    }

    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }
}

#[derive(Debug, Clone)]
pub struct ImageBatcher {
    pub image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

/// Items whose image fails to decode are dropped from the batch with a
/// warning, so a batch can come out smaller than requested or even empty.
impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let decoded: Vec<(Vec<f32>, i64)> = items
            .par_iter()
            .filter_map(|item| match load_and_preprocess_image(&item.image_path, self.image_size) {
                Ok(pixels) => Some((pixels, item.label as i64)),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable image");
                    None
                }
            })
            .collect();

        let batch_size = decoded.len();
        let (images_data, targets_data): (Vec<Vec<f32>>, Vec<i64>) = decoded.into_iter().unzip();
        let images_data: Vec<f32> = images_data.into_iter().flatten().collect();

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(images_data, [batch_size, 3, self.image_size, self.image_size]),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch::new(images, targets)
    }
}
