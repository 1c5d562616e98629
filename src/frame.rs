//! Frame container and device tags.
//!
//! - `Frame`: owned pixel buffer (1 or 3 interleaved channels, row-major).
//! - `DeviceTag`: which physical camera produced a frame.
//! - `FrameShape`: width × height × channels, used to size caller buffers.
//!
//! A frame is owned by whoever took it out of the sink. Copying it into a
//! caller buffer with `copy_into` leaves the source disposable.

use std::fmt;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{VisionError, VisionResult};

/// Identifier stamped on every frame by the transport.
///
/// Tags are assigned in attach order (0..N) and stay stable for the lifetime
/// of an acquisition session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceTag(u8);

impl DeviceTag {
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl FrameShape {
    pub fn new(width: u32, height: u32, channels: u8) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Number of bytes a frame of this shape occupies, or `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(self.channels as usize))
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Raw 2-D pixel buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    shape: FrameShape,
}

impl Frame {
    /// Wrap a pixel buffer, checking that its length matches the shape.
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> VisionResult<Self> {
        if channels != 1 && channels != 3 {
            return Err(VisionError::InvalidImage(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        let shape = FrameShape::new(width, height, channels);
        let expected = shape
            .byte_len()
            .ok_or_else(|| VisionError::InvalidImage("frame dimensions overflow".into()))?;
        if data.len() != expected {
            return Err(VisionError::InvalidImage(format!(
                "expected {} bytes for {}, received {}",
                expected,
                shape,
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    /// Zero-filled frame, used as a caller-owned grab buffer.
    pub fn blank(width: u32, height: u32, channels: u8) -> Self {
        let shape = FrameShape::new(width, height, channels);
        Self {
            data: vec![0u8; shape.byte_len().unwrap_or(0)],
            shape,
        }
    }

    pub fn blank_for(shape: FrameShape) -> Self {
        Self::blank(shape.width, shape.height, shape.channels)
    }

    pub fn from_gray_image(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            shape: FrameShape::new(width, height, 1),
        }
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn channels(&self) -> u8 {
        self.shape.channels
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Apply the grayscale policy: 3-channel frames become luma when enabled.
    pub fn formatted(self, grayscale: bool) -> Self {
        if grayscale && self.shape.channels == 3 {
            self.to_gray()
        } else {
            self
        }
    }

    /// RGB → luma with the usual 0.299/0.587/0.114 weights.
    pub fn to_gray(&self) -> Self {
        if self.shape.channels == 1 {
            return self.clone();
        }
        let data = self
            .data
            .chunks_exact(3)
            .map(|px| {
                let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                y.round().clamp(0.0, 255.0) as u8
            })
            .collect();
        Self {
            data,
            shape: FrameShape::new(self.shape.width, self.shape.height, 1),
        }
    }

    /// Copy pixels into a caller buffer of identical shape.
    ///
    /// On mismatch the destination is left untouched.
    pub fn copy_into(&self, dst: &mut Frame) -> VisionResult<()> {
        if dst.shape != self.shape {
            return Err(VisionError::ShapeMismatch {
                expected: dst.shape.to_string(),
                actual: self.shape.to_string(),
            });
        }
        dst.data.copy_from_slice(&self.data);
        Ok(())
    }

    /// Borrow as a single-channel `GrayImage` for contour analysis.
    pub fn to_gray_image(&self) -> VisionResult<GrayImage> {
        if self.shape.channels != 1 {
            return Err(VisionError::InvalidImage(format!(
                "expected a single-channel image, got {} channels",
                self.shape.channels
            )));
        }
        if self.shape.width == 0 || self.shape.height == 0 {
            return Err(VisionError::InvalidImage("image is empty".into()));
        }
        GrayImage::from_raw(self.shape.width, self.shape.height, self.data.clone())
            .ok_or_else(|| VisionError::InvalidImage("pixel buffer too small".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_buffer_of_wrong_length() {
        let err = Frame::new(vec![0; 10], 4, 4, 1).unwrap_err();
        assert!(matches!(err, VisionError::InvalidImage(_)));
        assert!(Frame::new(vec![0; 16], 4, 4, 2).is_err());
    }

    #[test]
    fn grayscale_policy_converts_color_only_when_enabled() {
        let rgb = Frame::new(vec![255, 0, 0, 0, 255, 0], 2, 1, 3).unwrap();

        let kept = rgb.clone().formatted(false);
        assert_eq!(kept.channels(), 3);

        let gray = rgb.formatted(true);
        assert_eq!(gray.channels(), 1);
        assert_eq!(gray.pixels(), &[76, 150]);
    }

    #[test]
    fn copy_into_leaves_buffer_untouched_on_shape_mismatch() {
        let src = Frame::new(vec![9; 6], 3, 2, 1).unwrap();
        let mut dst = Frame::blank(2, 3, 1);
        assert!(src.copy_into(&mut dst).is_err());
        assert!(dst.pixels().iter().all(|&p| p == 0));

        let mut dst = Frame::blank_for(src.shape());
        src.copy_into(&mut dst).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn gray_image_requires_single_channel() {
        let rgb = Frame::blank(2, 2, 3);
        assert!(rgb.to_gray_image().is_err());
        assert!(Frame::blank(0, 0, 1).to_gray_image().is_err());
        assert_eq!(Frame::blank(3, 2, 1).to_gray_image().unwrap().dimensions(), (3, 2));
    }

    #[test]
    fn device_tag_displays_index() {
        assert_eq!(DeviceTag::new(3).to_string(), "#3");
        assert_eq!(DeviceTag::new(3).index(), 3);
    }
}
