//! Image template matching engine
//!
//! Zero-mean normalized cross-correlation over the grayscale plane.
//! Deterministic: on tied scores the earliest match in row-major order wins.

use crate::template::Template;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use tracing::{debug, trace};
use uidriver_common::config::MatchConfig;
use uidriver_common::{MatchResult, Rect, Result};

/// Variance below this is treated as a flat region
const FLAT_EPS: f64 = 1e-6;

/// Template matching engine. Stateless apart from configuration; never
/// mutates the screenshot or template.
pub struct Matcher {
    config: MatchConfig,
}

impl Matcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    fn threshold_for(&self, template: &Template, min_similarity: Option<f32>) -> f32 {
        min_similarity
            .or(template.threshold_override)
            .unwrap_or(self.config.min_similarity)
    }

    /// Find the single best match for `template` in `screenshot`.
    ///
    /// Scale 1.0 is scanned first; when it misses the threshold, the
    /// configured scale factors are also tried (DPI mismatch between capture
    /// time and runtime) and the highest confidence across all attempted
    /// scales wins.
    pub fn find_best_match(
        &self,
        screenshot: &DynamicImage,
        template: &Template,
        min_similarity: Option<f32>,
    ) -> Result<MatchResult> {
        let threshold = self.threshold_for(template, min_similarity);
        let screen = screenshot.to_luma8();

        let mut best: Option<(Rect, f32, f32)> = None;

        let native = best_at_scale(&screen, template.gray());
        if let Some((rect, confidence)) = native {
            trace!(
                template = %template.path().display(),
                confidence,
                "scale 1.0 scan"
            );
            best = Some((rect, confidence, 1.0));
            if confidence >= threshold {
                return Ok(MatchResult {
                    found: true,
                    rect,
                    confidence,
                    template_path: template.path().to_path_buf(),
                    scale: 1.0,
                });
            }
        }

        // DPI rescan at the declared scale factors
        for &scale in &self.config.scale_factors {
            if (scale - 1.0).abs() < f32::EPSILON {
                continue;
            }
            let scaled = scale_template(template.gray(), scale);
            if let Some((rect, confidence)) = best_at_scale(&screen, &scaled) {
                trace!(
                    template = %template.path().display(),
                    scale,
                    confidence,
                    "rescan"
                );
                if best.map_or(true, |(_, c, _)| confidence > c) {
                    best = Some((rect, confidence, scale));
                }
            }
        }

        match best {
            Some((rect, confidence, scale)) if confidence >= threshold => {
                debug!(
                    "Matched {} at {:?} (confidence {:.3}, scale {})",
                    template.path().display(),
                    rect,
                    confidence,
                    scale
                );
                Ok(MatchResult {
                    found: true,
                    rect,
                    confidence,
                    template_path: template.path().to_path_buf(),
                    scale,
                })
            }
            Some((_, confidence, _)) => Ok(MatchResult::not_found(
                template.path().to_path_buf(),
                confidence,
            )),
            None => Ok(MatchResult::not_found(template.path().to_path_buf(), 0.0)),
        }
    }

    /// All non-overlapping matches at or above the threshold, sorted by
    /// descending confidence. Scanned at native scale.
    pub fn find_all(
        &self,
        screenshot: &DynamicImage,
        template: &Template,
        min_similarity: Option<f32>,
    ) -> Result<Vec<MatchResult>> {
        let threshold = self.threshold_for(template, min_similarity);
        let screen = screenshot.to_luma8();
        let tmpl = template.gray();

        let mut candidates: Vec<(Rect, f32)> = score_positions(&screen, tmpl)
            .into_iter()
            .filter(|(_, confidence)| *confidence >= threshold)
            .collect();

        // Descending confidence; row-major position breaks ties
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (a.0.y, a.0.x).cmp(&(b.0.y, b.0.x)))
        });

        // Greedy overlap suppression so multiplicity counts distinct hits
        let mut accepted: Vec<MatchResult> = Vec::new();
        for (rect, confidence) in candidates {
            if accepted.iter().any(|m| m.rect.intersects(&rect)) {
                continue;
            }
            accepted.push(MatchResult {
                found: true,
                rect,
                confidence,
                template_path: template.path().to_path_buf(),
                scale: 1.0,
            });
        }

        Ok(accepted)
    }
}

fn scale_template(tmpl: &GrayImage, scale: f32) -> GrayImage {
    let w = ((tmpl.width() as f32 * scale).round() as u32).max(1);
    let h = ((tmpl.height() as f32 * scale).round() as u32).max(1);
    imageops::resize(tmpl, w, h, FilterType::Triangle)
}

/// Best-scoring position for one template scale, or None when the template
/// does not fit inside the screenshot.
fn best_at_scale(screen: &GrayImage, tmpl: &GrayImage) -> Option<(Rect, f32)> {
    let mut best: Option<(Rect, f32)> = None;
    for (rect, confidence) in score_positions(screen, tmpl) {
        // Strict greater-than keeps the earliest row-major position on ties
        if best.map_or(true, |(_, c)| confidence > c) {
            best = Some((rect, confidence));
        }
    }
    best
}

/// Score every valid position in row-major order.
fn score_positions(screen: &GrayImage, tmpl: &GrayImage) -> Vec<(Rect, f32)> {
    let (sw, sh) = screen.dimensions();
    let (tw, th) = tmpl.dimensions();
    if tw == 0 || th == 0 || tw > sw || th > sh {
        return Vec::new();
    }

    let count = (tw * th) as f64;
    let tmpl_pixels: Vec<f64> = tmpl.pixels().map(|p| p.0[0] as f64).collect();
    let tmpl_mean = tmpl_pixels.iter().sum::<f64>() / count;
    let tmpl_norm_sq: f64 = tmpl_pixels.iter().map(|v| (v - tmpl_mean).powi(2)).sum();

    let mut scores = Vec::with_capacity(((sw - tw + 1) * (sh - th + 1)) as usize);
    for y in 0..=(sh - th) {
        for x in 0..=(sw - tw) {
            let confidence = ncc_at(screen, &tmpl_pixels, tmpl_mean, tmpl_norm_sq, x, y, tw, th);
            scores.push((Rect::new(x as i32, y as i32, tw, th), confidence));
        }
    }
    scores
}

#[allow(clippy::too_many_arguments)]
fn ncc_at(
    screen: &GrayImage,
    tmpl_pixels: &[f64],
    tmpl_mean: f64,
    tmpl_norm_sq: f64,
    x: u32,
    y: u32,
    tw: u32,
    th: u32,
) -> f32 {
    let count = (tw * th) as f64;

    let mut window_sum = 0.0;
    for dy in 0..th {
        for dx in 0..tw {
            window_sum += screen.get_pixel(x + dx, y + dy).0[0] as f64;
        }
    }
    let window_mean = window_sum / count;

    let mut cross = 0.0;
    let mut window_norm_sq = 0.0;
    for dy in 0..th {
        for dx in 0..tw {
            let s = screen.get_pixel(x + dx, y + dy).0[0] as f64 - window_mean;
            let t = tmpl_pixels[(dy * tw + dx) as usize] - tmpl_mean;
            cross += s * t;
            window_norm_sq += s * s;
        }
    }

    // Degenerate flat regions: correlation is undefined, fall back to mean
    // proximity so an exactly-equal flat patch still scores 1.0
    if tmpl_norm_sq < FLAT_EPS || window_norm_sq < FLAT_EPS {
        if tmpl_norm_sq < FLAT_EPS && window_norm_sq < FLAT_EPS {
            return (1.0 - (tmpl_mean - window_mean).abs() / 255.0) as f32;
        }
        return 0.0;
    }

    let ncc = cross / (tmpl_norm_sq.sqrt() * window_norm_sq.sqrt());
    ncc.clamp(0.0, 1.0) as f32
}
