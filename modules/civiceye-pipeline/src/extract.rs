//! Media normalization: fixed-shape frames out of raw image or video
//! payloads. Video is sampled, never exhaustively decoded.

use image::imageops::FilterType;
use image::{GrayImage, RgbImage};
use tracing::{debug, warn};

use civiceye_common::{CivicEyeError, MediaKind, MediaSample, PipelineConfig};

/// Thumbnail side used for the frame diversity heuristic. Coarse on
/// purpose: near-duplicate frames collapse to near-identical thumbs.
const DIVERSITY_THUMB_PX: u32 = 16;

/// JPEG start-of-image / end-of-image markers, used to locate frames in
/// an MJPEG-style video payload.
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// One normalized frame ready for classification: fixed-resolution RGB.
#[derive(Debug, Clone)]
pub struct Frame {
    pub rgb: RgbImage,
}

/// Normalizes raw media into 1..=K fixed-shape frames.
pub struct FeatureExtractor {
    frame_px: u32,
    frame_stride: usize,
    max_frames: usize,
}

impl FeatureExtractor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            frame_px: config.frame_px,
            frame_stride: config.frame_stride.max(1),
            max_frames: config.max_frames.max(1),
        }
    }

    /// Extract normalized frames from a sample. Always returns at least
    /// one frame on success.
    pub fn extract(&self, sample: &MediaSample) -> Result<Vec<Frame>, CivicEyeError> {
        if sample.bytes.is_empty() {
            return Err(CivicEyeError::EmptyMedia(format!(
                "sample {} has a zero-byte payload",
                sample.id
            )));
        }

        let frames = match sample.kind {
            MediaKind::Image => vec![self.normalize(&sample.bytes).ok_or_else(|| {
                CivicEyeError::EmptyMedia(format!("sample {} did not decode as an image", sample.id))
            })?],
            MediaKind::Video => self.extract_video(sample)?,
        };

        debug!(
            sample = %sample.id,
            kind = %sample.kind,
            frames = frames.len(),
            "Media normalized"
        );
        Ok(frames)
    }

    /// Decode one encoded image and normalize to the target shape.
    fn normalize(&self, bytes: &[u8]) -> Option<Frame> {
        let decoded = image::load_from_memory(bytes).ok()?;
        let rgb = decoded
            .resize_exact(self.frame_px, self.frame_px, FilterType::Triangle)
            .to_rgb8();
        Some(Frame { rgb })
    }

    /// Sample frames from an MJPEG-style payload at a fixed stride, then
    /// keep up to K frames chosen for mutual dissimilarity.
    fn extract_video(&self, sample: &MediaSample) -> Result<Vec<Frame>, CivicEyeError> {
        let located = locate_jpeg_frames(&sample.bytes);
        if located.is_empty() {
            return Err(CivicEyeError::EmptyMedia(format!(
                "sample {} contains no decodable video frames",
                sample.id
            )));
        }

        // Fixed-interval sampling before any decode work.
        let mut frames: Vec<Frame> = Vec::new();
        for (i, range) in located.iter().enumerate() {
            if i % self.frame_stride != 0 {
                continue;
            }
            match self.normalize(&sample.bytes[range.clone()]) {
                Some(frame) => frames.push(frame),
                None => warn!(sample = %sample.id, frame_index = i, "Skipping undecodable frame"),
            }
        }

        if frames.is_empty() {
            return Err(CivicEyeError::EmptyMedia(format!(
                "sample {} contains no decodable video frames",
                sample.id
            )));
        }

        if frames.len() > self.max_frames {
            frames = select_diverse(frames, self.max_frames);
        }
        Ok(frames)
    }
}

/// Byte ranges of complete JPEG frames (SOI..=EOI) in a payload.
fn locate_jpeg_frames(bytes: &[u8]) -> Vec<std::ops::Range<usize>> {
    let mut ranges = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i..i + 2] == JPEG_SOI {
            let start = i;
            let mut j = i + 2;
            let mut end = None;
            while j + 1 < bytes.len() {
                if bytes[j..j + 2] == JPEG_EOI {
                    end = Some(j + 2);
                    break;
                }
                j += 1;
            }
            match end {
                Some(end) => {
                    ranges.push(start..end);
                    i = end;
                }
                None => break, // Truncated trailing frame.
            }
        } else {
            i += 1;
        }
    }
    ranges
}

/// Greedy farthest-point selection over grayscale thumbnails: keep the
/// first frame, then repeatedly add the frame with the largest minimum
/// distance to everything already kept. Deterministic — index order
/// breaks ties — and output preserves temporal order.
fn select_diverse(frames: Vec<Frame>, k: usize) -> Vec<Frame> {
    let thumbs: Vec<GrayImage> = frames
        .iter()
        .map(|f| {
            image::imageops::resize(
                &image::imageops::grayscale(&f.rgb),
                DIVERSITY_THUMB_PX,
                DIVERSITY_THUMB_PX,
                FilterType::Triangle,
            )
        })
        .collect();

    let mut selected: Vec<usize> = vec![0];
    while selected.len() < k {
        let mut best: Option<(usize, f64)> = None;
        for candidate in 0..frames.len() {
            if selected.contains(&candidate) {
                continue;
            }
            let min_dist = selected
                .iter()
                .map(|&s| thumb_distance(&thumbs[candidate], &thumbs[s]))
                .fold(f64::INFINITY, f64::min);
            let better = match best {
                Some((_, d)) => min_dist > d,
                None => true,
            };
            if better {
                best = Some((candidate, min_dist));
            }
        }
        match best {
            Some((idx, _)) => selected.push(idx),
            None => break,
        }
    }

    selected.sort_unstable();
    let mut keep: Vec<Option<Frame>> = frames.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|i| keep[i].take())
        .collect()
}

/// Mean absolute pixel difference between two equal-size thumbnails.
fn thumb_distance(a: &GrayImage, b: &GrayImage) -> f64 {
    let total: f64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| (f64::from(pa.0[0]) - f64::from(pb.0[0])).abs())
        .sum();
    total / f64::from(DIVERSITY_THUMB_PX * DIVERSITY_THUMB_PX)
}
