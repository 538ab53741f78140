// Pixel conversion for live frame reads
//
// Decoded pictures arrive as YUV 4:2:0, 4:2:2 planar or packed YUYV and are
// written into caller-owned planar RGB or planar YUV buffers, as bytes or
// normalized floats.

pub mod convert;
pub mod tables;

pub use convert::{convert, FrameBuffer, FrameData, OutputColor};
pub use tables::{YuvTables, BYTE_TO_FLOAT};
