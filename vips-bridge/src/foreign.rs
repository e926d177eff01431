//! Loader and saver discovery.
//!
//! The engine decides which of its foreign-format operations handles a file or
//! buffer; these calls only ask, they never change engine state.

use crate::error::{Result, VipsError};
use crate::vips::Vips;
use std::fmt;
use std::path::Path;

/// Where an image to be loaded comes from.
#[derive(Debug, Clone, Copy)]
pub enum LoadSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

/// Image container formats, as identified by the loader that claims them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Jpeg,
    Png,
    Gif,
    Webp,
    Tiff,
    Svg,
    Pdf,
    Heif,
    Magick,
    Vips,
    Unknown,
}

/// Format part of foreign class names, after `VipsForeignLoad`/`VipsForeignSave`.
const CLASS_PREFIXES: &[(&str, ImageType)] = &[
    ("Jpeg", ImageType::Jpeg),
    ("Png", ImageType::Png),
    ("Gif", ImageType::Gif),
    ("Webp", ImageType::Webp),
    ("Tiff", ImageType::Tiff),
    ("Svg", ImageType::Svg),
    ("Pdf", ImageType::Pdf),
    ("Heif", ImageType::Heif),
    ("Magick", ImageType::Magick),
    ("Vips", ImageType::Vips),
];

impl ImageType {
    /// Map a loader name to the format it reads.
    ///
    /// Accepts the foreign class names the finders return
    /// (`"VipsForeignLoadJpegFile"`, `"VipsForeignLoadPngBuffer"`, ...) as well
    /// as operation nicknames (`"jpegload"`, `"pngload_buffer"`, ...).
    pub fn from_loader(loader: &str) -> Self {
        if let Some(class) = loader
            .strip_prefix("VipsForeignLoad")
            .or_else(|| loader.strip_prefix("VipsForeignSave"))
        {
            return CLASS_PREFIXES
                .iter()
                .find(|(prefix, _)| class.starts_with(*prefix))
                .map_or(ImageType::Unknown, |&(_, image_type)| image_type);
        }

        let stem = loader
            .strip_suffix("_buffer")
            .or_else(|| loader.strip_suffix("_source"))
            .unwrap_or(loader);
        match stem {
            "jpegload" => ImageType::Jpeg,
            "pngload" => ImageType::Png,
            "gifload" => ImageType::Gif,
            "webpload" => ImageType::Webp,
            "tiffload" => ImageType::Tiff,
            "svgload" => ImageType::Svg,
            "pdfload" => ImageType::Pdf,
            "heifload" => ImageType::Heif,
            "magickload" | "magick7load" => ImageType::Magick,
            "vipsload" => ImageType::Vips,
            _ => ImageType::Unknown,
        }
    }

    /// Conventional file extension, without the dot.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            ImageType::Jpeg => Some("jpeg"),
            ImageType::Png => Some("png"),
            ImageType::Gif => Some("gif"),
            ImageType::Webp => Some("webp"),
            ImageType::Tiff => Some("tiff"),
            ImageType::Svg => Some("svg"),
            ImageType::Pdf => Some("pdf"),
            ImageType::Heif => Some("heif"),
            ImageType::Magick => Some("magick"),
            ImageType::Vips => Some("v"),
            ImageType::Unknown => None,
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension().unwrap_or("unknown"))
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| VipsError::InvalidInput {
        message: format!("path {} is not valid UTF-8", path.display()),
    })
}

fn unsupported(input: impl Into<String>) -> VipsError {
    VipsError::UnsupportedFormat {
        input: input.into(),
    }
}

impl Vips {
    /// Name of the loader operation for the file at `path`.
    ///
    /// # Errors
    ///
    /// `UnsupportedFormat` if no loader claims the file, `NotRunning` if the
    /// engine was never started.
    pub fn find_load(&self, path: impl AsRef<Path>) -> Result<String> {
        self.ensure_started()?;
        let path = path_str(path.as_ref())?;
        self.engine().find_load(path).ok_or_else(|| unsupported(path))
    }

    /// Name of the loader operation for an in-memory buffer.
    pub fn find_load_buffer(&self, data: &[u8]) -> Result<String> {
        self.ensure_started()?;
        self.engine()
            .find_load_buffer(data)
            .ok_or_else(|| unsupported(format!("buffer of {} bytes", data.len())))
    }

    /// Name of the saver operation for a file name, chosen by its suffix.
    pub fn find_save(&self, path: impl AsRef<Path>) -> Result<String> {
        self.ensure_started()?;
        let path = path_str(path.as_ref())?;
        self.engine().find_save(path).ok_or_else(|| unsupported(path))
    }

    /// Name of the buffer saver operation for a suffix such as `".png"`.
    pub fn find_save_buffer(&self, suffix: &str) -> Result<String> {
        self.ensure_started()?;
        self.engine()
            .find_save_buffer(suffix)
            .ok_or_else(|| unsupported(suffix))
    }

    /// Name of the loader operation for either kind of source.
    pub fn resolve_loader(&self, source: LoadSource<'_>) -> Result<String> {
        match source {
            LoadSource::Path(path) => self.find_load(path),
            LoadSource::Bytes(data) => self.find_load_buffer(data),
        }
    }

    /// Format of an in-memory image, `ImageType::Unknown` if nothing claims it.
    pub fn determine_image_type(&self, data: &[u8]) -> ImageType {
        self.find_load_buffer(data)
            .map(|loader| ImageType::from_loader(&loader))
            .unwrap_or(ImageType::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_type_from_loader() {
        assert_eq!(ImageType::from_loader("jpegload"), ImageType::Jpeg);
        assert_eq!(ImageType::from_loader("jpegload_buffer"), ImageType::Jpeg);
        assert_eq!(ImageType::from_loader("pngload_source"), ImageType::Png);
        assert_eq!(ImageType::from_loader("magick7load_buffer"), ImageType::Magick);
        assert_eq!(ImageType::from_loader("rawload"), ImageType::Unknown);
    }

    #[test]
    fn test_image_type_from_class_name() {
        assert_eq!(ImageType::from_loader("VipsForeignLoadJpegFile"), ImageType::Jpeg);
        assert_eq!(ImageType::from_loader("VipsForeignLoadJpegBuffer"), ImageType::Jpeg);
        assert_eq!(ImageType::from_loader("VipsForeignLoadPngFile"), ImageType::Png);
        assert_eq!(ImageType::from_loader("VipsForeignLoadPdfiumFile"), ImageType::Pdf);
        assert_eq!(ImageType::from_loader("VipsForeignLoadMagick7Buffer"), ImageType::Magick);
        assert_eq!(ImageType::from_loader("VipsForeignLoadVipsFile"), ImageType::Vips);
        assert_eq!(ImageType::from_loader("VipsForeignSaveWebpBuffer"), ImageType::Webp);
        assert_eq!(ImageType::from_loader("VipsForeignLoadRaw"), ImageType::Unknown);
        assert_eq!(ImageType::from_loader("VipsForeignLoad"), ImageType::Unknown);
    }

    #[test]
    fn test_display() {
        assert_eq!(ImageType::Jpeg.to_string(), "jpeg");
        assert_eq!(ImageType::Unknown.to_string(), "unknown");
    }
}
