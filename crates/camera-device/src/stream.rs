//! Stream configuration types

use serde::{Deserialize, Serialize};

/// Pixel format code as carried on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Raw8,
    Raw10,
    Rgb565,
    Rgb555,
    Rgb444,
    Yuv422,
    Yuv420,
    YCbCr422,
    Other(u16),
}

impl PixelFormat {
    /// Wire code for this format
    pub fn code(&self) -> u16 {
        match self {
            PixelFormat::Raw8 => 0,
            PixelFormat::Raw10 => 1,
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgb555 => 3,
            PixelFormat::Rgb444 => 4,
            PixelFormat::Yuv422 => 5,
            PixelFormat::Yuv420 => 6,
            PixelFormat::YCbCr422 => 7,
            PixelFormat::Other(code) => *code,
        }
    }

    /// Bytes per pixel for packed formats
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Raw8 => 1,
            PixelFormat::Yuv420 => 2, // rounded up from 1.5
            _ => 2,
        }
    }
}

impl From<u16> for PixelFormat {
    fn from(code: u16) -> Self {
        match code {
            0 => PixelFormat::Raw8,
            1 => PixelFormat::Raw10,
            2 => PixelFormat::Rgb565,
            3 => PixelFormat::Rgb555,
            4 => PixelFormat::Rgb444,
            5 => PixelFormat::Yuv422,
            6 => PixelFormat::Yuv420,
            7 => PixelFormat::YCbCr422,
            other => PixelFormat::Other(other),
        }
    }
}

/// Image size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u16,
    pub height: u16,
}

impl ImageSize {
    pub const QVGA: Self = Self::new(320, 240);
    pub const VGA: Self = Self::new(640, 480);
    pub const XGA: Self = Self::new(1024, 768);
    pub const HD_720P: Self = Self::new(1280, 720);
    pub const SXGA: Self = Self::new(1280, 960);
    pub const HD_1080P: Self = Self::new(1920, 1080);
    pub const QSXGA: Self = Self::new(2592, 1944);

    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

/// Stream configuration requested by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfigRequest {
    /// Image width in pixels
    pub width: u16,
    /// Image height in pixels
    pub height: u16,
    /// Image format
    pub format: PixelFormat,
    /// Must be zero
    pub reserved: u16,
}

impl StreamConfigRequest {
    /// Encoded size on the wire
    pub const WIRE_SIZE: usize = 8;

    pub fn new(size: ImageSize, format: PixelFormat) -> Self {
        Self {
            width: size.width,
            height: size.height,
            format,
            reserved: 0,
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }
}

/// Stream configuration accepted by the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfigAnswer {
    /// Image width in pixels
    pub width: u16,
    /// Image height in pixels
    pub height: u16,
    /// Image format
    pub format: PixelFormat,
    /// CSI-2 virtual channel carrying the stream
    pub virtual_channel: u8,
    /// CSI-2 data type for the stream
    pub data_type: u8,
    /// Maximum frame size in bytes
    pub max_size: u32,
}

impl StreamConfigAnswer {
    /// Encoded size on the wire
    pub const WIRE_SIZE: usize = 12;
}

/// Size queries that precede variable-length answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SizeQuery {
    /// Supported stream configurations
    SupportedConfigs = 0,
    /// Current stream configuration answer
    CurrentConfig = 1,
    /// One metadata block
    Metadata = 2,
}

/// Camera module capability bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities(u8);

impl Capabilities {
    /// Metadata delivered over the bus
    pub const METADATA_GREYBUS: Self = Self(1 << 0);
    /// Metadata delivered in-band over MIPI
    pub const METADATA_MIPI: Self = Self(1 << 1);
    /// Still image capture
    pub const STILL_IMAGE: Self = Self(1 << 2);
    /// JPEG output
    pub const JPEG: Self = Self(1 << 3);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Flags returned alongside a stream configuration answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigFlags(u16);

impl ConfigFlags {
    /// At least one requested parameter was adjusted by the camera
    pub const ADJUSTED: Self = Self(1 << 0);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}
