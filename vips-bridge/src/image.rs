//! Engine-owned images.

use crate::engine::{ImageRefs, RawHandle};
use std::fmt;
use std::sync::Arc;

/// Numeric format of each band element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandFormat {
    Notset,
    Uchar,
    Char,
    Ushort,
    Short,
    Uint,
    Int,
    Float,
    Complex,
    Double,
    Dpcomplex,
    /// Unknown or unrecognized format code.
    Unknown(i32),
}

impl BandFormat {
    pub fn from_raw(value: i32) -> Self {
        match value {
            -1 => BandFormat::Notset,
            0 => BandFormat::Uchar,
            1 => BandFormat::Char,
            2 => BandFormat::Ushort,
            3 => BandFormat::Short,
            4 => BandFormat::Uint,
            5 => BandFormat::Int,
            6 => BandFormat::Float,
            7 => BandFormat::Complex,
            8 => BandFormat::Double,
            9 => BandFormat::Dpcomplex,
            other => BandFormat::Unknown(other),
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            BandFormat::Notset => -1,
            BandFormat::Uchar => 0,
            BandFormat::Char => 1,
            BandFormat::Ushort => 2,
            BandFormat::Short => 3,
            BandFormat::Uint => 4,
            BandFormat::Int => 5,
            BandFormat::Float => 6,
            BandFormat::Complex => 7,
            BandFormat::Double => 8,
            BandFormat::Dpcomplex => 9,
            BandFormat::Unknown(other) => other,
        }
    }

    /// Size of one band element in bytes (0 when unknown).
    pub fn element_size(self) -> usize {
        match self {
            BandFormat::Uchar | BandFormat::Char => 1,
            BandFormat::Ushort | BandFormat::Short => 2,
            BandFormat::Uint | BandFormat::Int | BandFormat::Float => 4,
            BandFormat::Complex | BandFormat::Double => 8,
            BandFormat::Dpcomplex => 16,
            BandFormat::Notset | BandFormat::Unknown(_) => 0,
        }
    }
}

/// Pixel coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coding {
    Error,
    None,
    Labq,
    Rad,
    /// Unknown or unrecognized coding.
    Unknown(i32),
}

impl Coding {
    pub fn from_raw(value: i32) -> Self {
        match value {
            -1 => Coding::Error,
            0 => Coding::None,
            2 => Coding::Labq,
            6 => Coding::Rad,
            other => Coding::Unknown(other),
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Coding::Error => -1,
            Coding::None => 0,
            Coding::Labq => 2,
            Coding::Rad => 6,
            Coding::Unknown(other) => other,
        }
    }
}

/// How pixel values should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpretation {
    Error,
    Multiband,
    BW,
    Histogram,
    Xyz,
    Lab,
    Cmyk,
    Labq,
    Rgb,
    Cmc,
    Lch,
    Labs,
    Srgb,
    Yxy,
    Fourier,
    Rgb16,
    Grey16,
    Matrix,
    Scrgb,
    Hsv,
    /// Unknown or unrecognized interpretation.
    Unknown(i32),
}

impl Interpretation {
    pub fn from_raw(value: i32) -> Self {
        match value {
            -1 => Interpretation::Error,
            0 => Interpretation::Multiband,
            1 => Interpretation::BW,
            10 => Interpretation::Histogram,
            12 => Interpretation::Xyz,
            13 => Interpretation::Lab,
            15 => Interpretation::Cmyk,
            16 => Interpretation::Labq,
            17 => Interpretation::Rgb,
            18 => Interpretation::Cmc,
            19 => Interpretation::Lch,
            21 => Interpretation::Labs,
            22 => Interpretation::Srgb,
            23 => Interpretation::Yxy,
            24 => Interpretation::Fourier,
            25 => Interpretation::Rgb16,
            26 => Interpretation::Grey16,
            27 => Interpretation::Matrix,
            28 => Interpretation::Scrgb,
            29 => Interpretation::Hsv,
            other => Interpretation::Unknown(other),
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Interpretation::Error => -1,
            Interpretation::Multiband => 0,
            Interpretation::BW => 1,
            Interpretation::Histogram => 10,
            Interpretation::Xyz => 12,
            Interpretation::Lab => 13,
            Interpretation::Cmyk => 15,
            Interpretation::Labq => 16,
            Interpretation::Rgb => 17,
            Interpretation::Cmc => 18,
            Interpretation::Lch => 19,
            Interpretation::Labs => 21,
            Interpretation::Srgb => 22,
            Interpretation::Yxy => 23,
            Interpretation::Fourier => 24,
            Interpretation::Rgb16 => 25,
            Interpretation::Grey16 => 26,
            Interpretation::Matrix => 27,
            Interpretation::Scrgb => 28,
            Interpretation::Hsv => 29,
            Interpretation::Unknown(other) => other,
        }
    }
}

/// Header fields of an image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageHeader {
    pub width: i32,
    pub height: i32,
    pub bands: i32,
    /// Horizontal resolution in pixels per millimetre.
    pub xres: f64,
    /// Vertical resolution in pixels per millimetre.
    pub yres: f64,
    pub xoffset: i32,
    pub yoffset: i32,
    pub format: BandFormat,
    pub coding: Coding,
    pub interpretation: Interpretation,
}

impl ImageHeader {
    /// Header of an uncoded image with unit resolution and no offset.
    pub fn new(width: i32, height: i32, bands: i32, format: BandFormat) -> Self {
        let interpretation = if bands == 1 {
            Interpretation::BW
        } else if bands == 3 {
            Interpretation::Srgb
        } else {
            Interpretation::Multiband
        };
        Self {
            width,
            height,
            bands,
            xres: 1.0,
            yres: 1.0,
            xoffset: 0,
            yoffset: 0,
            format,
            coding: Coding::None,
            interpretation,
        }
    }

    /// Number of band elements (width x height x bands), `None` on overflow.
    pub fn sample_count(&self) -> Option<usize> {
        let dim = |v: i32| usize::try_from(v.max(0)).ok();
        dim(self.width)?
            .checked_mul(dim(self.height)?)?
            .checked_mul(dim(self.bands)?)
    }

    /// Size of the pixel data in bytes, `None` on overflow.
    pub fn byte_size(&self) -> Option<usize> {
        self.sample_count()?.checked_mul(self.format.element_size())
    }
}

/// A counted reference to an engine-owned image.
///
/// Cloning adds a reference, dropping releases one. Two handles are equal when
/// they refer to the same engine object. Header accessors never mutate the image.
pub struct ImageHandle {
    raw: RawHandle,
    refs: Arc<dyn ImageRefs>,
}

impl ImageHandle {
    /// Take ownership of one reference to `raw`.
    ///
    /// # Safety
    ///
    /// `raw` must be a live image of the engine behind `refs`, and the caller
    /// must own the reference being handed over.
    pub unsafe fn from_owned(raw: RawHandle, refs: Arc<dyn ImageRefs>) -> Self {
        Self { raw, refs }
    }

    /// Get the raw handle.
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// Read all header fields at once.
    pub fn header(&self) -> ImageHeader {
        // SAFETY: this handle owns a reference, so the image is live.
        unsafe { self.refs.header(self.raw) }
    }

    /// Width of the image in pixels.
    pub fn width(&self) -> i32 {
        self.header().width
    }

    /// Height of the image in pixels.
    pub fn height(&self) -> i32 {
        self.header().height
    }

    /// Number of bands.
    pub fn bands(&self) -> i32 {
        self.header().bands
    }

    /// Horizontal resolution.
    pub fn resolution_x(&self) -> f64 {
        self.header().xres
    }

    /// Vertical resolution.
    pub fn resolution_y(&self) -> f64 {
        self.header().yres
    }

    pub fn offset_x(&self) -> i32 {
        self.header().xoffset
    }

    pub fn offset_y(&self) -> i32 {
        self.header().yoffset
    }

    pub fn band_format(&self) -> BandFormat {
        self.header().format
    }

    pub fn coding(&self) -> Coding {
        self.header().coding
    }

    pub fn interpretation(&self) -> Interpretation {
        self.header().interpretation
    }
}

impl Clone for ImageHandle {
    fn clone(&self) -> Self {
        // SAFETY: this handle owns a reference, so the image is live; the new
        // reference belongs to the clone.
        unsafe { self.refs.retain(self.raw) };
        Self {
            raw: self.raw,
            refs: Arc::clone(&self.refs),
        }
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        // SAFETY: each handle owns exactly one reference.
        unsafe { self.refs.release(self.raw) };
    }
}

impl PartialEq for ImageHandle {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("raw", &self.raw)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_codes_round_trip() {
        for code in -1..30 {
            assert_eq!(Interpretation::from_raw(code).to_raw(), code);
            assert_eq!(BandFormat::from_raw(code).to_raw(), code);
            assert_eq!(Coding::from_raw(code).to_raw(), code);
        }
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(Interpretation::from_raw(22), Interpretation::Srgb);
        assert_eq!(BandFormat::from_raw(6), BandFormat::Float);
        assert_eq!(Coding::from_raw(6), Coding::Rad);
        assert_eq!(Interpretation::from_raw(99), Interpretation::Unknown(99));
    }

    #[test]
    fn test_header_sizes() {
        let header = ImageHeader::new(10, 4, 3, BandFormat::Ushort);
        assert_eq!(header.sample_count(), Some(120));
        assert_eq!(header.byte_size(), Some(240));
        assert_eq!(header.interpretation, Interpretation::Srgb);

        let mono = ImageHeader::new(2, 2, 1, BandFormat::Uchar);
        assert_eq!(mono.interpretation, Interpretation::BW);
        assert_eq!(mono.coding, Coding::None);
    }

    #[test]
    fn test_header_sizes_overflow() {
        let huge = ImageHeader::new(i32::MAX, i32::MAX, i32::MAX, BandFormat::Uchar);
        assert_eq!(huge.sample_count(), None);
        assert_eq!(huge.byte_size(), None);

        let wide = ImageHeader::new(i32::MAX, i32::MAX, 1, BandFormat::Double);
        assert_eq!(wide.byte_size(), None);

        let empty = ImageHeader::new(-4, 3, 1, BandFormat::Uchar);
        assert_eq!(empty.sample_count(), Some(0));
    }
}
