// src/codecs/mod.rs
//
// Codec primitives used by the worker decode engine and the fallback decoder:
// TIFF directory reading, OJPEG stream reconstruction, TIFF pixel decode and
// raster encoding.

pub mod ifd;
pub mod ojpeg;
pub mod raster;
pub mod tiff_codec;

pub use ifd::{ByteOrder, Ifd, TiffDirectory, COMPRESSION_JPEG2000, COMPRESSION_OJPEG};
pub use raster::{encode_jpeg, encode_png, RasterEncoding, RasterSurface};
pub use tiff_codec::TiffCodec;
