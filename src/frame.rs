//! Frames moving through the pipeline and the pixel layouts they use.
//!
//! Plugins work on packed RGB. The sink gets YUYV, drawing needs RGBA.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Pixel, Rgb, Rgba};

/// Byte layout of [`VideoFrame::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 3 bytes per pixel, the working format
    Rgb,
    /// 4 bytes per pixel, used while drawing overlays
    Rgba,
    /// YUV 4:2:2 packed format (Y0 U0 Y1 V0), what v4l2loopback consumers expect
    Yuyv,
}

impl PixelFormat {
    /// Average bytes per pixel; YUYV shares chroma between two pixels.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
            PixelFormat::Yuyv => 2,
        }
    }

    fn ezk(&self) -> ezk_image::PixelFormat {
        match self {
            PixelFormat::Rgb => ezk_image::PixelFormat::RGB,
            PixelFormat::Rgba => ezk_image::PixelFormat::RGBA,
            PixelFormat::Yuyv => ezk_image::PixelFormat::YUYV,
        }
    }

    fn color_info(&self) -> ezk_image::ColorInfo {
        match self {
            PixelFormat::Rgb | PixelFormat::Rgba => ezk_image::ColorInfo::RGB(ezk_image::RgbColorInfo {
                transfer: ezk_image::ColorTransfer::Linear,
                primaries: ezk_image::ColorPrimaries::BT709,
            }),
            PixelFormat::Yuyv => ezk_image::ColorInfo::YUV(ezk_image::YuvColorInfo {
                transfer: ezk_image::ColorTransfer::Linear,
                primaries: ezk_image::ColorPrimaries::BT709,
                space: ezk_image::ColorSpace::BT709,
                full_range: false,
            }),
        }
    }
}

/// One image, tightly packed without row padding.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// `width * height * bytes_per_pixel` bytes
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// All-zero frame.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = (width as usize) * (height as usize) * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            data: vec![0; size],
        }
    }

    /// Wrap `data` as is. Length mismatches surface on the first conversion.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    fn expected_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * self.format.bytes_per_pixel()
    }

    fn check_len(&self) -> Result<()> {
        if self.data.len() != self.expected_len() {
            return Err(anyhow!(
                "{:?} frame {}x{} carries {} bytes, expected {}",
                self.format,
                self.width,
                self.height,
                self.data.len(),
                self.expected_len()
            ));
        }
        Ok(())
    }

    /// Clamp the frame to `max_width` x `max_height`.
    ///
    /// Each axis is handled on its own: an axis above its ceiling is shrunk to
    /// exactly the ceiling, an axis below it keeps its size. The aspect ratio
    /// is not preserved. Frames already within limits are returned untouched.
    pub fn enforce_ceiling(self, max_width: u32, max_height: u32) -> Result<VideoFrame> {
        if self.width <= max_width && self.height <= max_height {
            return Ok(self);
        }
        let new_width = self.width.min(max_width);
        let new_height = self.height.min(max_height);
        tracing::trace!(
            "Resizing frame {}x{} -> {}x{}",
            self.width,
            self.height,
            new_width,
            new_height
        );

        match self.format {
            PixelFormat::Rgb => resize_packed::<Rgb<u8>>(self, new_width, new_height),
            PixelFormat::Rgba => resize_packed::<Rgba<u8>>(self, new_width, new_height),
            PixelFormat::Yuyv => self.to_rgb()?.enforce_ceiling(max_width, max_height),
        }
    }

    /// Swap the red and blue channels in place.
    pub fn swap_red_blue(&mut self) -> Result<()> {
        self.check_len()?;
        let step = match self.format {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
            PixelFormat::Yuyv => {
                *self = self.to_rgb()?;
                3
            }
        };
        for pixel in self.data.chunks_exact_mut(step) {
            pixel.swap(0, 2);
        }
        Ok(())
    }

    /// Mirror the frame around its vertical axis.
    pub fn flip_horizontal(&mut self) -> Result<()> {
        self.check_len()?;
        if self.format == PixelFormat::Yuyv {
            *self = self.to_rgb()?;
        }
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }
        let bpp = self.format.bytes_per_pixel();
        let pixels = self.width as usize;
        for row in self.data.chunks_exact_mut(pixels * bpp) {
            for x in 0..pixels / 2 {
                let (left, right) = row.split_at_mut((pixels - 1 - x) * bpp);
                left[x * bpp..(x + 1) * bpp].swap_with_slice(&mut right[..bpp]);
            }
        }
        Ok(())
    }

    /// Convert into `format`, returning self when it already matches.
    pub fn convert_to(self, format: PixelFormat) -> Result<VideoFrame> {
        if self.format == format {
            self.check_len()?;
            return Ok(self);
        }
        match format {
            PixelFormat::Rgb => self.to_rgb(),
            PixelFormat::Rgba => self.to_rgba(),
            PixelFormat::Yuyv => self.to_yuyv(),
        }
    }

    /// Copy in the working format.
    pub fn to_rgb(&self) -> Result<VideoFrame> {
        self.check_len()?;
        match self.format {
            PixelFormat::Rgb => Ok(self.clone()),
            // Fast path: drop alpha
            PixelFormat::Rgba => {
                let data = self
                    .data
                    .chunks_exact(4)
                    .flat_map(|px| [px[0], px[1], px[2]])
                    .collect();
                Ok(VideoFrame::from_data(self.width, self.height, PixelFormat::Rgb, data))
            }
            PixelFormat::Yuyv => self.convert_with_ezk(PixelFormat::Rgb),
        }
    }

    /// Copy with an opaque alpha channel.
    pub fn to_rgba(&self) -> Result<VideoFrame> {
        self.check_len()?;
        match self.format {
            PixelFormat::Rgba => Ok(self.clone()),
            PixelFormat::Rgb => {
                let data = self
                    .data
                    .chunks_exact(3)
                    .flat_map(|px| [px[0], px[1], px[2], 255])
                    .collect();
                Ok(VideoFrame::from_data(self.width, self.height, PixelFormat::Rgba, data))
            }
            PixelFormat::Yuyv => self.convert_with_ezk(PixelFormat::Rgba),
        }
    }

    /// Copy in the layout the loopback sink writes.
    pub fn to_yuyv(&self) -> Result<VideoFrame> {
        self.check_len()?;
        if self.format == PixelFormat::Yuyv {
            return Ok(self.clone());
        }
        self.convert_with_ezk(PixelFormat::Yuyv)
    }

    fn convert_with_ezk(&self, target: PixelFormat) -> Result<VideoFrame> {
        let width = self.width as usize;
        let height = self.height as usize;
        let mut out = vec![0u8; width * height * target.bytes_per_pixel()];
        {
            let src_image = ezk_image::Image::from_buffer(
                self.format.ezk(),
                &self.data[..],
                None,
                width,
                height,
                self.format.color_info(),
            )
            .map_err(|e| anyhow!("failed to wrap {:?} source buffer: {:?}", self.format, e))?;
            let mut dst_image = ezk_image::Image::from_buffer(
                target.ezk(),
                &mut out[..],
                None,
                width,
                height,
                target.color_info(),
            )
            .map_err(|e| anyhow!("failed to wrap {:?} destination buffer: {:?}", target, e))?;
            ezk_image::convert(&src_image, &mut dst_image)
                .map_err(|e| anyhow!("{:?} -> {:?} conversion failed: {:?}", self.format, target, e))?;
        }
        Ok(VideoFrame::from_data(self.width, self.height, target, out))
    }
}

fn resize_packed<P>(frame: VideoFrame, width: u32, height: u32) -> Result<VideoFrame>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let format = frame.format;
    let img = ImageBuffer::<P, Vec<u8>>::from_raw(frame.width, frame.height, frame.data)
        .ok_or_else(|| anyhow!("frame buffer is smaller than its {:?} dimensions", format))?;
    let resized = imageops::resize(&img, width, height, FilterType::Triangle);
    Ok(VideoFrame::from_data(width, height, format, resized.into_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> VideoFrame {
        let data = (0..width * height)
            .flat_map(|i| [(i % 256) as u8, 0, 255 - (i % 256) as u8])
            .collect();
        VideoFrame::from_data(width, height, PixelFormat::Rgb, data)
    }

    #[test]
    fn test_drawing_round_trip_keeps_pixels() {
        let frame = gradient(3, 2);
        let rgba = frame.clone().convert_to(PixelFormat::Rgba).unwrap();
        assert_eq!(rgba.data.len(), 3 * 2 * 4);
        assert!(rgba.data.chunks_exact(4).all(|px| px[3] == 255));
        assert_eq!(rgba.convert_to(PixelFormat::Rgb).unwrap().data, frame.data);
    }

    #[test]
    fn test_ceiling_only_shrinks_the_exceeding_height() {
        let frame = gradient(800, 1000).enforce_ceiling(1280, 720).unwrap();
        assert_eq!((frame.width, frame.height), (800, 720));
        assert_eq!(frame.data.len(), 800 * 720 * 3);
    }

    #[test]
    fn test_ceiling_only_shrinks_the_exceeding_width() {
        let frame = gradient(1500, 600).enforce_ceiling(1280, 720).unwrap();
        assert_eq!((frame.width, frame.height), (1280, 600));
    }

    #[test]
    fn test_ceiling_leaves_small_frames_alone() {
        let original = gradient(640, 480);
        let frame = original.clone().enforce_ceiling(1280, 720).unwrap();
        assert_eq!(frame.data, original.data);
    }

    #[test]
    fn test_swap_red_blue() {
        let mut frame = VideoFrame::from_data(1, 2, PixelFormat::Rgb, vec![1, 2, 3, 4, 5, 6]);
        frame.swap_red_blue().unwrap();
        assert_eq!(frame.data, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_flip_horizontal_reverses_each_row() {
        let mut frame = VideoFrame::from_data(
            3,
            2,
            PixelFormat::Rgb,
            vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4, 5, 5, 5, 6, 6, 6],
        );
        frame.flip_horizontal().unwrap();
        assert_eq!(
            frame.data,
            vec![3, 3, 3, 2, 2, 2, 1, 1, 1, 6, 6, 6, 5, 5, 5, 4, 4, 4]
        );
    }

    #[test]
    fn test_truncated_buffer_is_an_error() {
        let mut frame = VideoFrame::from_data(2, 2, PixelFormat::Rgb, vec![0; 5]);
        assert!(frame.flip_horizontal().is_err());
        assert!(frame.to_yuyv().is_err());
    }

    #[test]
    fn test_yuyv_output_size() {
        let yuyv = gradient(4, 2).to_yuyv().unwrap();
        assert_eq!(yuyv.format, PixelFormat::Yuyv);
        assert_eq!(yuyv.data.len(), 4 * 2 * 2);
    }
}
