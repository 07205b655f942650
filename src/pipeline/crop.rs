//! Crop extraction: normalized box → pixel rectangle → PNG artifact.
//!
//! The pixel stage pads the box again, independently of the normalized-space
//! correction. Rounding at small pixel counts can clip an edge that looked
//! safe as a fraction, so every side gets `max(min_margin_px, 2% of extent)`.
//! Crops below `min_size_px` on an axis are re-centred to that size; crops
//! that end up tiny or nearly full-page are kept but carry a
//! [`FigureError::GeometryDegenerate`] warning.
//!
//! Everything here is synchronous. Callers run it inside
//! `tokio::task::spawn_blocking`.

use crate::config::CropParams;
use crate::error::{CropError, FigureError};
use crate::region::{NormalizedBox, PixelBox};
use crate::store::{ArtifactRef, FigureStore};
use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A persisted crop plus the in-memory image used for review.
#[derive(Debug, Clone)]
pub struct CropArtifact {
    pub artifact_ref: ArtifactRef,
    pub path: PathBuf,
    pub pixel_box: PixelBox,
    pub image: DynamicImage,
    pub warnings: Vec<FigureError>,
}

#[derive(Debug, Clone)]
pub struct CropExtractor {
    params: CropParams,
}

impl CropExtractor {
    pub fn new(params: CropParams) -> Self {
        Self { params }
    }

    /// Pixel rectangle for `bbox` on a `width × height` image.
    ///
    /// The result always lies within the image and is at least 1px on each
    /// axis when the image is non-empty.
    pub fn pixel_rect(&self, bbox: &NormalizedBox, width: u32, height: u32) -> PixelBox {
        let (left, right) = self.axis(bbox.x, bbox.width, width);
        let (top, bottom) = self.axis(bbox.y, bbox.height, height);
        PixelBox {
            left,
            top,
            right,
            bottom,
        }
    }

    fn axis(&self, start: f64, extent: f64, dim: u32) -> (u32, u32) {
        let dim = i64::from(dim);
        if dim == 0 {
            return (0, 0);
        }
        let to_px = |v: f64| {
            let v = if v.is_finite() { v } else { 0.0 };
            ((v * dim as f64).round() as i64).clamp(0, dim)
        };
        let mut lo = to_px(start);
        let mut hi = to_px(start + extent);

        let margin = i64::from(self.params.min_margin_px)
            .max(((hi - lo) as f64 * self.params.expansion_ratio).round() as i64);
        lo = (lo - margin).max(0);
        hi = (hi + margin).min(dim);

        let min_size = i64::from(self.params.min_size_px);
        if hi - lo < min_size {
            if dim <= min_size {
                lo = 0;
                hi = dim;
            } else {
                let center = (lo + hi) / 2;
                lo = (center - min_size / 2).max(0);
                hi = lo + min_size;
                if hi > dim {
                    hi = dim;
                    lo = dim - min_size;
                }
            }
        }

        if hi <= lo {
            lo = lo.min(dim - 1);
            hi = lo + 1;
        }
        (lo as u32, hi as u32)
    }

    /// Quality warnings for a final crop of `rect` on a `width × height` page.
    pub fn size_warnings(
        &self,
        page_number: usize,
        rect: &PixelBox,
        width: u32,
        height: u32,
    ) -> Vec<FigureError> {
        let (w, h) = (rect.width(), rect.height());
        let degenerate = |detail: String| FigureError::GeometryDegenerate {
            page: page_number,
            width: w,
            height: h,
            detail,
        };
        let mut warnings = Vec::new();
        let floor = self.params.warn_min_px;
        if w < floor || h < floor {
            warnings.push(degenerate(format!("smaller than {floor}x{floor}px")));
        }
        let ratio = self.params.max_size_ratio;
        if f64::from(w) > ratio * f64::from(width) || f64::from(h) > ratio * f64::from(height) {
            warnings.push(degenerate(format!(
                "covers more than {:.0}% of the page",
                ratio * 100.0
            )));
        }
        warnings
    }

    /// Cut `bbox` out of an in-memory page image.
    pub fn crop_image(
        &self,
        page: &DynamicImage,
        page_number: usize,
        bbox: &NormalizedBox,
    ) -> Result<(DynamicImage, PixelBox, Vec<FigureError>), CropError> {
        let (width, height) = page.dimensions();
        if width == 0 || height == 0 {
            return Err(CropError::EmptyImage);
        }
        let rect = self.pixel_rect(bbox, width, height);
        let warnings = self.size_warnings(page_number, &rect, width, height);
        for w in &warnings {
            warn!("{}", w);
        }
        let crop = page.crop_imm(rect.left, rect.top, rect.width(), rect.height());
        Ok((crop, rect, warnings))
    }

    /// Open the page image, crop `bbox` and persist the result.
    pub fn extract(
        &self,
        store: &FigureStore,
        document_id: &str,
        page_number: usize,
        page_path: &Path,
        bbox: &NormalizedBox,
        stem: &str,
    ) -> Result<CropArtifact, CropError> {
        if !page_path.is_file() {
            return Err(CropError::SourceMissing {
                path: page_path.to_path_buf(),
            });
        }
        let page = image::open(page_path).map_err(|e| CropError::Decode {
            path: page_path.to_path_buf(),
            detail: e.to_string(),
        })?;

        let (image, pixel_box, warnings) = self.crop_image(&page, page_number, bbox)?;
        let (artifact_ref, path) = store.save_png(document_id, stem, &image)?;
        debug!(
            "Page {}: cropped {}x{}px at ({}, {}) → {}",
            page_number,
            pixel_box.width(),
            pixel_box.height(),
            pixel_box.left,
            pixel_box.top,
            artifact_ref
        );

        Ok(CropArtifact {
            artifact_ref,
            path,
            pixel_box,
            image,
            warnings,
        })
    }
}
