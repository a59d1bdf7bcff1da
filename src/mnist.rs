//! Reader for the IDX files MNIST (and Fashion-MNIST) ship in
//!
//! ```text
//! images: 0x00 0x00 0x08 0x03 | n: u32 BE | rows: u32 BE | cols: u32 BE | n*rows*cols u8
//! labels: 0x00 0x00 0x08 0x01 | n: u32 BE | n u8
//! ```
//!
//! Files must be decompressed first.

use std::{fs, path::Path};

use thiserror::Error;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

#[derive(Debug, Error)]
pub enum IdxError {
    #[error("Failed to read IDX file: {0}")]
    Io(#[from] std::io::Error),
    #[error("IDX file too short: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("Bad IDX magic {magic:02X?}, expected {expected:02X?}")]
    BadMagic { magic: [u8; 4], expected: [u8; 4] },
    #[error("{images} images but {labels} labels")]
    CountMismatch { images: usize, labels: usize },
    #[error("Images must have at least one pixel, got {rows}x{cols}")]
    EmptyImages { rows: usize, cols: usize },
    #[error("Label {label} at index {index} is not below {n_classes}")]
    LabelOutOfRange {
        index: usize,
        label: u8,
        n_classes: usize,
    },
}

/// Pixel normalization applied after scaling bytes into `[0, 1]`, i.e. `(x - mean) / std`
#[derive(Debug, Clone, Copy)]
pub struct Normalize {
    pub mean: f32,
    pub std: f32,
}

impl Default for Normalize {
    /// Maps `[0, 1]` onto `[-1, 1]`
    fn default() -> Self {
        Self {
            mean: 0.5,
            std: 0.5,
        }
    }
}

impl Normalize {
    pub fn apply(&self, byte: u8) -> f32 {
        (byte as f32 / 255.0 - self.mean) / self.std
    }
}

/// Flattened images with their class labels
#[derive(Debug, Clone)]
pub struct Mnist {
    pub images: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
    pub rows: usize,
    pub cols: usize,
}

impl Mnist {
    pub const N_CLASSES: usize = 10;

    /// Loads the training split from `dir`
    pub fn train(dir: impl AsRef<Path>, normalize: Normalize) -> Result<Self, IdxError> {
        let dir = dir.as_ref();
        Self::from_files(dir.join(TRAIN_IMAGES), dir.join(TRAIN_LABELS), normalize)
    }

    /// Loads the test split from `dir`
    pub fn test(dir: impl AsRef<Path>, normalize: Normalize) -> Result<Self, IdxError> {
        let dir = dir.as_ref();
        Self::from_files(dir.join(TEST_IMAGES), dir.join(TEST_LABELS), normalize)
    }

    pub fn from_files(
        images: impl AsRef<Path>,
        labels: impl AsRef<Path>,
        normalize: Normalize,
    ) -> Result<Self, IdxError> {
        log::info!("Loading IDX images from '{}'", images.as_ref().display());
        let image_bytes = fs::read(images)?;
        let label_bytes = fs::read(labels)?;
        Self::parse(&image_bytes, &label_bytes, normalize)
    }

    pub fn parse(
        image_bytes: &[u8],
        label_bytes: &[u8],
        normalize: Normalize,
    ) -> Result<Self, IdxError> {
        check_header(image_bytes, [0x00, 0x00, 0x08, 0x03], 16)?;
        check_header(label_bytes, [0x00, 0x00, 0x08, 0x01], 8)?;

        let n_images = read_u32(image_bytes, 4);
        let rows = read_u32(image_bytes, 8);
        let cols = read_u32(image_bytes, 12);
        let n_labels = read_u32(label_bytes, 4);
        if n_images != n_labels {
            return Err(IdxError::CountMismatch {
                images: n_images,
                labels: n_labels,
            });
        }

        let n_pixels = rows.saturating_mul(cols);
        if n_pixels == 0 {
            return Err(IdxError::EmptyImages { rows, cols });
        }
        let needed = n_images.saturating_mul(n_pixels).saturating_add(16);
        if image_bytes.len() < needed {
            return Err(IdxError::Truncated {
                needed,
                got: image_bytes.len(),
            });
        }
        if label_bytes.len() < 8 + n_labels {
            return Err(IdxError::Truncated {
                needed: 8 + n_labels,
                got: label_bytes.len(),
            });
        }

        let images = image_bytes[16..needed]
            .chunks(n_pixels)
            .take(n_images)
            .map(|img| img.iter().map(|b| normalize.apply(*b)).collect())
            .collect();
        let labels = label_bytes[8..8 + n_labels]
            .iter()
            .enumerate()
            .map(|(index, label)| match *label as usize {
                class if class < Self::N_CLASSES => Ok(class),
                _ => Err(IdxError::LabelOutOfRange {
                    index,
                    label: *label,
                    n_classes: Self::N_CLASSES,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("Loaded {} images of {}x{}", n_images, rows, cols);

        Ok(Self {
            images,
            labels,
            rows,
            cols,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn check_header(bytes: &[u8], expected: [u8; 4], header_len: usize) -> Result<(), IdxError> {
    if bytes.len() < header_len {
        return Err(IdxError::Truncated {
            needed: header_len,
            got: bytes.len(),
        });
    }
    let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if magic != expected {
        return Err(IdxError::BadMagic { magic, expected });
    }
    Ok(())
}

fn read_u32(bytes: &[u8], offset: usize) -> usize {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_float;

    fn idx_pair(images: &[[u8; 4]], labels: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut image_bytes = vec![0x00, 0x00, 0x08, 0x03];
        image_bytes.extend((images.len() as u32).to_be_bytes());
        image_bytes.extend(2u32.to_be_bytes());
        image_bytes.extend(2u32.to_be_bytes());
        for img in images {
            image_bytes.extend(img);
        }
        let mut label_bytes = vec![0x00, 0x00, 0x08, 0x01];
        label_bytes.extend((labels.len() as u32).to_be_bytes());
        label_bytes.extend(labels);
        (image_bytes, label_bytes)
    }

    #[test]
    fn test_parse() {
        let (images, labels) = idx_pair(&[[0, 255, 51, 204], [255, 255, 0, 0]], &[3, 7]);
        let mnist = Mnist::parse(&images, &labels, Normalize::default()).unwrap();
        assert_eq!(mnist.len(), 2);
        assert_eq!((mnist.rows, mnist.cols), (2, 2));
        assert_eq!(mnist.labels, vec![3, 7]);
        assert_eq_float!(mnist.images[0][0], -1.0);
        assert_eq_float!(mnist.images[0][1], 1.0);
        assert_eq_float!(mnist.images[0][2], -0.6, 1e-5);
        assert_eq_float!(mnist.images[0][3], 0.6, 1e-5);
    }

    #[test]
    fn test_parse_errors() {
        let (mut images, labels) = idx_pair(&[[0, 0, 0, 0]], &[1]);
        assert!(matches!(
            Mnist::parse(&images, &labels[..5], Normalize::default()),
            Err(IdxError::Truncated { .. })
        ));

        let (_, two_labels) = idx_pair(&[], &[1, 2]);
        assert!(matches!(
            Mnist::parse(&images, &two_labels, Normalize::default()),
            Err(IdxError::CountMismatch {
                images: 1,
                labels: 2
            })
        ));

        images.truncate(18);
        assert!(matches!(
            Mnist::parse(&images, &labels, Normalize::default()),
            Err(IdxError::Truncated { needed: 20, got: 18 })
        ));

        let (_, bad_labels) = idx_pair(&[[0, 0, 0, 0]], &[200]);
        let (good_images, _) = idx_pair(&[[0, 0, 0, 0]], &[1]);
        assert!(matches!(
            Mnist::parse(&good_images, &bad_labels, Normalize::default()),
            Err(IdxError::LabelOutOfRange {
                index: 0,
                label: 200,
                n_classes: 10
            })
        ));

        // three 0x0 images
        let mut empty_images = vec![0x00, 0x00, 0x08, 0x03];
        empty_images.extend(3u32.to_be_bytes());
        empty_images.extend([0u8; 8]);
        let (_, three_labels) = idx_pair(&[], &[1, 2, 3]);
        assert!(matches!(
            Mnist::parse(&empty_images, &three_labels, Normalize::default()),
            Err(IdxError::EmptyImages { rows: 0, cols: 0 })
        ));

        images[3] = 0x01;
        assert!(matches!(
            Mnist::parse(&images, &labels, Normalize::default()),
            Err(IdxError::BadMagic { .. })
        ));
    }
}
