//! Link configuration.

use enumset::{EnumSet, EnumSetType};
use fugit::HertzU32;

use crate::regs::Variant;

/// Pixel format of the video stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PixelFormat {
    /// 16 bits per pixel.
    Rgb565,
    /// 18 bits per pixel, each pixel padded to 3 bytes.
    Rgb666,
    /// 18 bits per pixel, tightly packed.
    Rgb666Packed,
    /// 24 bits per pixel.
    #[default]
    Rgb888,
}

impl PixelFormat {
    /// Bits each pixel occupies on the link, used for the pixel clock
    /// divider.
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb565 => 16,
            PixelFormat::Rgb666Packed => 18,
            PixelFormat::Rgb666 | PixelFormat::Rgb888 => 24,
        }
    }

    /// DISP0_CTRL pixel format encoding.
    pub(crate) const fn disp0_format(self) -> u32 {
        match self {
            PixelFormat::Rgb565 => 0,
            PixelFormat::Rgb666Packed => 1,
            PixelFormat::Rgb666 => 2,
            PixelFormat::Rgb888 => 3,
        }
    }
}

/// Link operating mode flags.
#[derive(Debug, EnumSetType)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeFlag {
    /// Continuous video stream. Without it the link runs in command mode.
    Video,
    /// Let the HS clock lane drop to LP between transmissions.
    ClockNonContinuous,
    /// Send commands in low-power mode by default.
    LowPowerMode,
}

/// Link configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ConfigError {
    /// Lane count outside 1..=4.
    InvalidLaneCount,
    /// The selected block has fewer data lanes than requested.
    TooManyLanes,
    /// In video mode the bits per pixel must divide evenly across lanes.
    IndivisibleFormat,
    /// Virtual channel outside 0..=3.
    InvalidChannel,
    /// The PHY bit clock is zero.
    InvalidBitClock,
}

impl core::error::Error for ConfigError {}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::InvalidLaneCount => write!(f, "Lane count must be between 1 and 4"),
            ConfigError::TooManyLanes => write!(f, "The DSI block does not have that many lanes"),
            ConfigError::IndivisibleFormat => {
                write!(f, "Bits per pixel are not divisible by the lane count")
            }
            ConfigError::InvalidChannel => write!(f, "Virtual channel must be between 0 and 3"),
            ConfigError::InvalidBitClock => write!(f, "PHY bit clock must be non-zero"),
        }
    }
}

/// Link configuration, fixed at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct LinkConfig {
    /// Number of data lanes, 1 to 4.
    pub lanes: u8,

    /// Pixel format of the video stream.
    pub format: PixelFormat,

    /// Operating mode.
    pub mode: EnumSet<ModeFlag>,

    /// Virtual channel of the peripheral.
    pub channel: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            lanes: 1,
            format: PixelFormat::default(),
            mode: EnumSet::empty(),
            channel: 0,
        }
    }
}

impl LinkConfig {
    /// Set the number of data lanes.
    pub fn with_lanes(mut self, lanes: u8) -> Self {
        self.lanes = lanes;
        self
    }

    /// Set the pixel format.
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the operating mode flags.
    pub fn with_mode(mut self, mode: EnumSet<ModeFlag>) -> Self {
        self.mode = mode;
        self
    }

    /// Set the virtual channel.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Whether the link carries a continuous video stream.
    pub fn is_video(&self) -> bool {
        self.mode.contains(ModeFlag::Video)
    }

    /// Checks the configuration against the capabilities of `variant`.
    pub fn validate(&self, variant: Variant) -> Result<(), ConfigError> {
        if !(1..=4).contains(&self.lanes) {
            return Err(ConfigError::InvalidLaneCount);
        }
        if self.lanes > variant.map().max_lanes {
            return Err(ConfigError::TooManyLanes);
        }
        if self.channel > 3 {
            return Err(ConfigError::InvalidChannel);
        }
        if self.is_video() && self.format.bits_per_pixel() % self.lanes as u32 != 0 {
            return Err(ConfigError::IndivisibleFormat);
        }
        Ok(())
    }

    /// Ratio between the byte clock and the pixel clock.
    pub fn pixel_clock_divider(&self) -> u32 {
        self.format.bits_per_pixel() / self.lanes.max(1) as u32
    }
}

/// Byte clock of the PHY for a given bit clock.
pub fn byte_clock(bit_clock: HertzU32) -> HertzU32 {
    bit_clock / 8
}
