use image::{imageops, GrayImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;

use super::geometry::{long_axis_angle, oriented_box, polygon_moments};
use super::{ExtractorConfig, PoseCandidate};
use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;

/// Threshold → external contours → moments + minimum-area rectangle.
#[derive(Clone, Debug, Default)]
pub struct PoseExtractor {
    config: ExtractorConfig,
}

impl PoseExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn top() -> Self {
        Self::new(ExtractorConfig::top())
    }

    pub fn detail() -> Self {
        Self::new(ExtractorConfig::detail())
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract pose candidates from a single-channel frame.
    ///
    /// An empty list means "no part in view". Only a malformed image
    /// (color, empty, bad ROI) is an error.
    pub fn extract(&self, image: &Frame) -> VisionResult<Vec<PoseCandidate>> {
        let gray = image.to_gray_image()?;
        self.extract_gray(&gray)
    }

    pub fn extract_gray(&self, image: &GrayImage) -> VisionResult<Vec<PoseCandidate>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::InvalidImage("image is empty".into()));
        }

        let view = self.prepare(image)?;
        let mask = self.foreground_mask(&view);
        let total_area = view.width() as f64 * view.height() as f64;

        let mut candidates = Vec::new();
        let contours = find_contours::<i32>(&mask);
        for contour in contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        {
            let moments = polygon_moments(&contour.points);
            if moments.area() / total_area < self.config.min_area_fraction {
                continue;
            }
            // A zero-area contour ends the scan for this frame.
            let Some((x, y)) = moments.centroid() else {
                break;
            };
            let Some(corners) = oriented_box(&contour.points) else {
                break;
            };
            let angle_deg = long_axis_angle(&corners, self.config.angle_convention);
            candidates.push(PoseCandidate { x, y, angle_deg });
        }

        log::debug!(
            "PoseExtractor: {} contour(s), {} candidate(s)",
            contours.len(),
            candidates.len()
        );
        Ok(candidates)
    }

    fn prepare(&self, image: &GrayImage) -> VisionResult<GrayImage> {
        let mut view = match self.config.roi {
            Some(roi) => {
                let fits = roi.width > 0
                    && roi.height > 0
                    && roi.x.checked_add(roi.width).is_some_and(|r| r <= image.width())
                    && roi.y.checked_add(roi.height).is_some_and(|b| b <= image.height());
                if !fits {
                    return Err(VisionError::InvalidImage(format!(
                        "roi {}x{}+{}+{} outside {}x{} image",
                        roi.width,
                        roi.height,
                        roi.x,
                        roi.y,
                        image.width(),
                        image.height()
                    )));
                }
                imageops::crop_imm(image, roi.x, roi.y, roi.width, roi.height).to_image()
            }
            None => image.clone(),
        };
        if self.config.flip_vertical {
            imageops::flip_vertical_in_place(&mut view);
        }
        Ok(view)
    }

    /// Pixels strictly darker than the threshold become foreground.
    fn foreground_mask(&self, image: &GrayImage) -> GrayImage {
        let mask = match self.config.threshold {
            0 => GrayImage::new(image.width(), image.height()),
            t => threshold(image, t - 1, ThresholdType::BinaryInverted),
        };
        if self.config.dilate_radius > 0 {
            dilate(&mask, Norm::LInf, self.config.dilate_radius)
        } else {
            mask
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{AngleConvention, Roi};
    use crate::transport::{SceneObject, SimScene};

    const W: u32 = 200;
    const H: u32 = 160;

    fn render(objects: &[SceneObject]) -> Frame {
        let scene = objects
            .iter()
            .fold(SimScene::default(), |scene, o| scene.with_object(*o));
        scene.render(W, H, 1)
    }

    fn angle_error(a: f64, b: f64) -> f64 {
        let d = (a - b).rem_euclid(180.0);
        d.min(180.0 - d)
    }

    #[test]
    fn recovers_center_and_angle_of_rotated_bar() {
        let extractor = PoseExtractor::top();
        for theta in [0.0, 30.0, -45.0, 60.0, 90.0] {
            let image = render(&[SceneObject::new(100.0, 80.0, 80.0, 24.0, theta)]);
            let poses = extractor.extract(&image).unwrap();

            assert_eq!(poses.len(), 1, "theta {}", theta);
            let pose = poses[0];
            assert!((pose.x - 100).abs() <= 2, "theta {}: x {}", theta, pose.x);
            assert!((pose.y - 80).abs() <= 2, "theta {}: y {}", theta, pose.y);
            assert!(
                angle_error(pose.angle_deg, theta) < 3.0,
                "theta {}: angle {}",
                theta,
                pose.angle_deg
            );
            assert!(pose.angle_deg > -90.0 && pose.angle_deg <= 90.0);
        }
    }

    #[test]
    fn blank_image_yields_no_candidates() {
        let poses = PoseExtractor::top().extract(&render(&[])).unwrap();
        assert!(poses.is_empty());
    }

    #[test]
    fn specks_below_min_area_are_ignored() {
        let image = render(&[
            SceneObject::new(60.0, 80.0, 60.0, 20.0, 0.0),
            SceneObject::new(160.0, 40.0, 4.0, 4.0, 0.0),
        ]);
        let poses = PoseExtractor::top().extract(&image).unwrap();

        assert_eq!(poses.len(), 1);
        assert!((poses[0].x - 60).abs() <= 2);
    }

    #[test]
    fn each_separate_part_is_reported() {
        let image = render(&[
            SceneObject::new(50.0, 50.0, 50.0, 16.0, 20.0),
            SceneObject::new(150.0, 110.0, 50.0, 16.0, -20.0),
        ]);
        let poses = PoseExtractor::top().extract(&image).unwrap();
        assert_eq!(poses.len(), 2);
    }

    #[test]
    fn holes_and_parts_inside_holes_are_ignored() {
        let mut hole = SceneObject::new(100.0, 80.0, 70.0, 70.0, 0.0);
        hole.intensity = 200;
        let image = render(&[
            SceneObject::new(100.0, 80.0, 30.0, 20.0, 0.0),
            hole,
            SceneObject::new(100.0, 80.0, 110.0, 110.0, 0.0),
        ]);
        let poses = PoseExtractor::top().extract(&image).unwrap();

        assert_eq!(poses.len(), 1);
        assert!((poses[0].x - 100).abs() <= 2);
        assert!((poses[0].y - 80).abs() <= 2);
    }

    #[test]
    fn clockwise_convention_flips_sign() {
        let image = render(&[SceneObject::new(100.0, 80.0, 80.0, 24.0, 30.0)]);
        let config = ExtractorConfig {
            angle_convention: AngleConvention::Clockwise,
            ..ExtractorConfig::top()
        };
        let poses = PoseExtractor::new(config).extract(&image).unwrap();
        assert!(angle_error(poses[0].angle_deg, -30.0) < 3.0);
    }

    #[test]
    fn detail_dilation_merges_close_fragments() {
        let image = render(&[
            SceneObject::new(80.0, 80.0, 40.0, 20.0, 0.0),
            SceneObject::new(125.0, 80.0, 40.0, 20.0, 0.0),
        ]);

        let plain = ExtractorConfig {
            dilate_radius: 0,
            ..ExtractorConfig::detail()
        };
        assert_eq!(PoseExtractor::new(plain).extract(&image).unwrap().len(), 2);

        let merged = PoseExtractor::detail().extract(&image).unwrap();
        assert_eq!(merged.len(), 1);
        assert!(angle_error(merged[0].angle_deg, 0.0) < 3.0);
    }

    #[test]
    fn roi_and_flip_move_the_frame_of_reference() {
        let image = render(&[SceneObject::new(60.0, 40.0, 70.0, 16.0, 30.0)]);
        let config = ExtractorConfig {
            roi: Some(Roi {
                x: 20,
                y: 0,
                width: 160,
                height: 160,
            }),
            flip_vertical: true,
            ..ExtractorConfig::top()
        };
        let poses = PoseExtractor::new(config).extract(&image).unwrap();

        assert_eq!(poses.len(), 1);
        assert!((poses[0].x - 40).abs() <= 2);
        assert!((poses[0].y - 119).abs() <= 2);
        assert!(angle_error(poses[0].angle_deg, -30.0) < 3.0);
    }

    #[test]
    fn zero_area_contour_ends_the_scan() {
        // The speck is met first in raster order and has no enclosed area.
        let image = render(&[
            SceneObject::new(30.0, 10.0, 1.0, 1.0, 0.0),
            SceneObject::new(100.0, 80.0, 80.0, 24.0, 0.0),
        ]);
        let keep_all = ExtractorConfig {
            min_area_fraction: 0.0,
            ..ExtractorConfig::top()
        };
        assert!(PoseExtractor::new(keep_all).extract(&image).unwrap().is_empty());

        let poses = PoseExtractor::top().extract(&image).unwrap();
        assert_eq!(poses.len(), 1);
        assert!((poses[0].x - 100).abs() <= 2);
    }

    #[test]
    fn threshold_is_strict_and_zero_masks_nothing() {
        let scene = SimScene {
            background: 200,
            ..SimScene::default()
        };
        let mut part = SceneObject::new(100.0, 80.0, 80.0, 24.0, 0.0);
        part.intensity = 50;
        let image = scene.with_object(part).render(W, H, 1);

        let at = |threshold: u8| ExtractorConfig {
            threshold,
            ..ExtractorConfig::top()
        };
        assert!(PoseExtractor::new(at(50)).extract(&image).unwrap().is_empty());
        assert_eq!(PoseExtractor::new(at(51)).extract(&image).unwrap().len(), 1);
        assert!(PoseExtractor::new(at(0)).extract(&image).unwrap().is_empty());
    }

    #[test]
    fn malformed_images_are_errors() {
        let extractor = PoseExtractor::top();
        assert!(matches!(
            extractor.extract(&Frame::blank(10, 10, 3)),
            Err(VisionError::InvalidImage(_))
        ));
        assert!(matches!(
            extractor.extract(&Frame::blank(0, 0, 1)),
            Err(VisionError::InvalidImage(_))
        ));

        let outside = ExtractorConfig {
            roi: Some(Roi {
                x: 150,
                y: 0,
                width: 100,
                height: 10,
            }),
            ..ExtractorConfig::top()
        };
        assert!(PoseExtractor::new(outside).extract(&render(&[])).is_err());
    }
}
