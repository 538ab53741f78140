// Picture -> planar RGB / planar YUV conversion
//
// Each output channel is written in its own pass over the source so that
// only one destination plane is hot in cache at a time.

use super::tables::{YuvTables, BYTE_TO_FLOAT};
use crate::error::ConvertError;
use crate::video::{DecodedPicture, PixelLayout};

/// Caller-owned sample storage
pub enum FrameData<'a> {
    Byte(&'a mut [u8]),
    Float(&'a mut [f32]),
}

impl FrameData<'_> {
    fn len(&self) -> usize {
        match self {
            FrameData::Byte(b) => b.len(),
            FrameData::Float(f) => f.len(),
        }
    }
}

/// Which three planes to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputColor {
    /// R, G, B planes
    Rgb,
    /// Full resolution Y, U, V planes (chroma upsampled)
    Yuv,
}

/// Destination descriptor for a live frame read
pub struct FrameBuffer<'a> {
    pub data: FrameData<'a>,
    pub color: OutputColor,
    /// Distance in samples between the start of consecutive planes
    pub plane_stride: usize,
    /// Distance in samples between the start of consecutive rows
    pub row_stride: usize,
}

impl<'a> FrameBuffer<'a> {
    /// Tightly packed planes for a `width` x `height` frame
    pub fn packed(data: FrameData<'a>, color: OutputColor, width: usize, height: usize) -> Self {
        Self {
            data,
            color,
            plane_stride: width * height,
            row_stride: width,
        }
    }

    /// Check the descriptor against the frame size before anything is written
    pub fn validate(&self, width: usize, height: usize) -> Result<(), ConvertError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        if self.row_stride < width {
            return Err(ConvertError::RowStrideTooSmall {
                row_stride: self.row_stride,
                width,
            });
        }
        let plane_len = (height - 1) * self.row_stride + width;
        if self.plane_stride < plane_len {
            return Err(ConvertError::PlaneOverlap {
                plane_stride: self.plane_stride,
                needed: plane_len,
            });
        }
        let needed = 2 * self.plane_stride + plane_len;
        if self.data.len() < needed {
            return Err(ConvertError::BufferTooSmall {
                needed,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

trait Sample: Copy {
    fn from_byte(b: u8) -> Self;
}

impl Sample for u8 {
    #[inline]
    fn from_byte(b: u8) -> Self {
        b
    }
}

impl Sample for f32 {
    #[inline]
    fn from_byte(b: u8) -> Self {
        b as f32 * BYTE_TO_FLOAT
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    R,
    G,
    B,
    Y,
    U,
    V,
}

impl Channel {
    #[inline]
    fn sample(self, t: &YuvTables, y: u8, u: u8, v: u8) -> u8 {
        match self {
            Channel::R => t.red(y, u, v),
            Channel::G => t.green(y, u, v),
            Channel::B => t.blue(y, u, v),
            Channel::Y => y,
            Channel::U => u,
            Channel::V => v,
        }
    }
}

/// Convert `picture` into the planes described by `out`
pub fn convert(tables: &YuvTables, picture: &DecodedPicture, out: &mut FrameBuffer) -> Result<(), ConvertError> {
    let (w, h) = (picture.width as usize, picture.height as usize);
    check_picture(picture)?;
    out.validate(w, h)?;
    if w == 0 || h == 0 {
        return Ok(());
    }

    let channels = match out.color {
        OutputColor::Rgb => [Channel::R, Channel::G, Channel::B],
        OutputColor::Yuv => [Channel::Y, Channel::U, Channel::V],
    };
    let (plane_stride, row_stride) = (out.plane_stride, out.row_stride);

    match &mut out.data {
        FrameData::Byte(data) => {
            for (k, ch) in channels.into_iter().enumerate() {
                channel_pass(tables, picture, &mut data[k * plane_stride..], row_stride, ch);
            }
        }
        FrameData::Float(data) => {
            for (k, ch) in channels.into_iter().enumerate() {
                channel_pass(tables, picture, &mut data[k * plane_stride..], row_stride, ch);
            }
        }
    }
    Ok(())
}

fn channel_pass<S: Sample>(
    tables: &YuvTables,
    picture: &DecodedPicture,
    plane: &mut [S],
    row_stride: usize,
    channel: Channel,
) {
    let w = picture.width as usize;
    for row in 0..picture.height as usize {
        let dst = &mut plane[row * row_stride..row * row_stride + w];
        for_each_pair(picture, row, |i, y0, y1, u, v| {
            dst[2 * i] = S::from_byte(channel.sample(tables, y0, u, v));
            dst[2 * i + 1] = S::from_byte(channel.sample(tables, y1, u, v));
        });
    }
}

/// Visit every horizontal luma pair of `row` with its shared chroma sample
#[inline]
fn for_each_pair(picture: &DecodedPicture, row: usize, mut f: impl FnMut(usize, u8, u8, u8, u8)) {
    let w = picture.width as usize;
    match picture.layout {
        PixelLayout::Yuv420p | PixelLayout::Yuv422p => {
            let chroma_row = if picture.layout == PixelLayout::Yuv420p { row / 2 } else { row };
            let (yp, up, vp) = (&picture.planes[0], &picture.planes[1], &picture.planes[2]);
            let y = &yp.data[row * yp.stride..row * yp.stride + w];
            let u = &up.data[chroma_row * up.stride..chroma_row * up.stride + w / 2];
            let v = &vp.data[chroma_row * vp.stride..chroma_row * vp.stride + w / 2];
            for (i, (luma, (&u, &v))) in y.chunks_exact(2).zip(u.iter().zip(v)).enumerate() {
                f(i, luma[0], luma[1], u, v);
            }
        }
        PixelLayout::Yuyv422 => {
            let p = &picture.planes[0];
            let packed = &p.data[row * p.stride..row * p.stride + 2 * w];
            for (i, px) in packed.chunks_exact(4).enumerate() {
                f(i, px[0], px[2], px[1], px[3]);
            }
        }
    }
}

/// Reject pictures whose planes cannot cover the declared size
fn check_picture(picture: &DecodedPicture) -> Result<(), ConvertError> {
    let (w, h) = (picture.width as usize, picture.height as usize);
    let odd_rows = picture.layout == PixelLayout::Yuv420p && h % 2 != 0;
    if w % 2 != 0 || odd_rows {
        return Err(ConvertError::OddDimensions {
            width: picture.width,
            height: picture.height,
        });
    }
    if w == 0 || h == 0 {
        return Ok(());
    }

    let required: Vec<(usize, usize)> = match picture.layout {
        PixelLayout::Yuv420p => vec![(w, h), (w / 2, h / 2), (w / 2, h / 2)],
        PixelLayout::Yuv422p => vec![(w, h), (w / 2, h), (w / 2, h)],
        PixelLayout::Yuyv422 => vec![(2 * w, h)],
    };
    for (i, (row_len, rows)) in required.into_iter().enumerate() {
        let plane = picture.planes.get(i).ok_or(ConvertError::MissingPlane(i))?;
        let needed = (rows - 1) * plane.stride + row_len;
        if plane.stride < row_len || plane.data.len() < needed {
            return Err(ConvertError::MissingPlane(i));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::Plane;
    use proptest::prelude::*;

    /// Float reference for the integer tables
    fn reference_rgb(y: u8, u: u8, v: u8) -> (f64, f64, f64) {
        let (y, u, v) = (y as f64 - 16.0, u as f64 - 128.0, v as f64 - 128.0);
        let luma = y * 298.0 / 256.0;
        let r = luma + 459.0 * v / 256.0;
        let g = luma - 137.0 * u / 256.0 - 55.0 * v / 256.0;
        let b = luma + 541.0 * u / 256.0;
        (r.clamp(0.0, 255.0), g.clamp(0.0, 255.0), b.clamp(0.0, 255.0))
    }

    fn rgb_bytes(picture: &DecodedPicture) -> Vec<u8> {
        let (w, h) = (picture.width as usize, picture.height as usize);
        let mut out = vec![0u8; 3 * w * h];
        let mut fb = FrameBuffer::packed(FrameData::Byte(&mut out), OutputColor::Rgb, w, h);
        convert(&YuvTables::new(), picture, &mut fb).unwrap();
        out
    }

    #[test]
    fn solid_colour_matches_reference_in_every_layout() {
        for layout in [PixelLayout::Yuv420p, PixelLayout::Yuv422p, PixelLayout::Yuyv422] {
            let picture = DecodedPicture::solid(8, 4, layout, 81, 90, 240);
            let out = rgb_bytes(&picture);
            let (r, g, b) = reference_rgb(81, 90, 240);
            let n = 8 * 4;
            for (plane, expected) in [(0, r), (1, g), (2, b)] {
                for &s in &out[plane * n..(plane + 1) * n] {
                    assert!((s as f64 - expected).abs() <= 3.0, "{layout:?} plane {plane}: {s} vs {expected}");
                }
            }
        }
    }

    #[test]
    fn chroma_is_shared_by_two_by_two_blocks() {
        // 4x2 frame: left block is red-ish, right block blue-ish
        let picture = DecodedPicture {
            width: 4,
            height: 2,
            layout: PixelLayout::Yuv420p,
            planes: vec![
                Plane { data: vec![120; 8], stride: 4 },
                Plane { data: vec![90, 240], stride: 2 },
                Plane { data: vec![240, 110], stride: 2 },
            ],
            pts: 0,
        };
        let out = rgb_bytes(&picture);
        let red = &out[0..8];
        assert_eq!(red[0], red[1]);
        assert_eq!(red[0], red[4]);
        assert_eq!(red[0], red[5]);
        assert!(red[0] > red[2]);
        let blue = &out[16..24];
        assert!(blue[3] > blue[0]);
    }

    #[test]
    fn yuyv_reads_y0_u_y1_v() {
        let picture = DecodedPicture {
            width: 2,
            height: 1,
            layout: PixelLayout::Yuyv422,
            planes: vec![Plane { data: vec![16, 128, 235, 128], stride: 4 }],
            pts: 0,
        };
        let mut out = vec![0u8; 6];
        let mut fb = FrameBuffer::packed(FrameData::Byte(&mut out), OutputColor::Yuv, 2, 1);
        convert(&YuvTables::new(), &picture, &mut fb).unwrap();
        assert_eq!(out, vec![16, 235, 128, 128, 128, 128]);
    }

    #[test]
    fn yuv_output_upsamples_chroma() {
        let picture = DecodedPicture {
            width: 4,
            height: 2,
            layout: PixelLayout::Yuv420p,
            planes: vec![
                Plane { data: (0..8).collect(), stride: 4 },
                Plane { data: vec![10, 20], stride: 2 },
                Plane { data: vec![30, 40], stride: 2 },
            ],
            pts: 0,
        };
        let mut out = vec![0u8; 24];
        let mut fb = FrameBuffer::packed(FrameData::Byte(&mut out), OutputColor::Yuv, 4, 2);
        convert(&YuvTables::new(), &picture, &mut fb).unwrap();
        assert_eq!(&out[0..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(&out[8..16], &[10, 10, 20, 20, 10, 10, 20, 20]);
        assert_eq!(&out[16..24], &[30, 30, 40, 40, 30, 30, 40, 40]);
    }

    #[test]
    fn float_output_is_normalized() {
        let picture = DecodedPicture::solid(2, 2, PixelLayout::Yuv420p, 235, 128, 128);
        let mut out = vec![0f32; 12];
        let mut fb = FrameBuffer::packed(FrameData::Float(&mut out), OutputColor::Rgb, 2, 2);
        convert(&YuvTables::new(), &picture, &mut fb).unwrap();
        for s in out {
            assert!((s - 254.0 / 255.0).abs() < 1e-6);
        }
    }

    #[test]
    fn respects_row_and_plane_strides() {
        let picture = DecodedPicture::solid(2, 2, PixelLayout::Yuv422p, 200, 128, 128);
        // 3 samples per row, 8 per plane, sentinel everywhere else
        let mut out = vec![7u8; 24];
        let mut fb = FrameBuffer {
            data: FrameData::Byte(&mut out),
            color: OutputColor::Yuv,
            plane_stride: 8,
            row_stride: 3,
        };
        convert(&YuvTables::new(), &picture, &mut fb).unwrap();
        assert_eq!(&out[0..8], &[200, 200, 7, 200, 200, 7, 7, 7]);
        assert_eq!(&out[8..13], &[128, 128, 7, 128, 128]);
    }

    #[test]
    fn invalid_buffers_are_rejected_before_writing() {
        let picture = DecodedPicture::solid(4, 4, PixelLayout::Yuv420p, 100, 128, 128);
        let tables = YuvTables::new();

        let mut small = vec![9u8; 47];
        let mut fb = FrameBuffer::packed(FrameData::Byte(&mut small), OutputColor::Rgb, 4, 4);
        assert_eq!(
            convert(&tables, &picture, &mut fb),
            Err(ConvertError::BufferTooSmall { needed: 48, actual: 47 })
        );
        assert!(small.iter().all(|&b| b == 9));

        let mut buf = vec![0u8; 64];
        let mut fb = FrameBuffer {
            data: FrameData::Byte(&mut buf),
            color: OutputColor::Rgb,
            plane_stride: 16,
            row_stride: 3,
        };
        assert!(matches!(convert(&tables, &picture, &mut fb), Err(ConvertError::RowStrideTooSmall { .. })));

        let mut fb = FrameBuffer {
            data: FrameData::Byte(&mut buf),
            color: OutputColor::Rgb,
            plane_stride: 10,
            row_stride: 4,
        };
        assert!(matches!(convert(&tables, &picture, &mut fb), Err(ConvertError::PlaneOverlap { .. })));
    }

    #[test]
    fn odd_dimensions_are_rejected() {
        let mut picture = DecodedPicture::solid(4, 4, PixelLayout::Yuv420p, 100, 128, 128);
        picture.height = 3;
        let mut buf = vec![0u8; 64];
        let mut fb = FrameBuffer::packed(FrameData::Byte(&mut buf), OutputColor::Rgb, 4, 3);
        assert!(matches!(
            convert(&YuvTables::new(), &picture, &mut fb),
            Err(ConvertError::OddDimensions { .. })
        ));
    }

    proptest! {
        #[test]
        fn outputs_stay_in_range(y in any::<u8>(), u in any::<u8>(), v in any::<u8>()) {
            let tables = YuvTables::new();
            let picture = DecodedPicture::solid(2, 2, PixelLayout::Yuv420p, y, u, v);
            let mut out = vec![-1f32; 12];
            let mut fb = FrameBuffer::packed(FrameData::Float(&mut out), OutputColor::Rgb, 2, 2);
            convert(&tables, &picture, &mut fb).unwrap();
            for s in &out {
                prop_assert!((0.0..=1.0).contains(s));
            }

            let (r, g, b) = reference_rgb(y, u, v);
            // each table entry truncates, so the error is below one per term
            prop_assert!((tables.red(y, u, v) as f64 - r).abs() < 2.0);
            prop_assert!((tables.green(y, u, v) as f64 - g).abs() < 3.0);
            prop_assert!((tables.blue(y, u, v) as f64 - b).abs() < 2.0);
        }
    }
}
