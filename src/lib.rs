//! # MIPI DSI host controller
//!
//! Driver for the DSI0 and DSI1 host blocks of the BCM2835 family. The
//! driver programs the D-PHY timing from the PHY bit clock, sequences the
//! lanes in and out of ULPS and exchanges command mode messages with the
//! attached panel.
//!
//! Pixel streaming in video mode is done by the pixel valve. This driver
//! only sets the link up for it.
//!
//! ## Usage
//!
//! ```rust, ignore
//! static STATE: State = State::new();
//!
//! let port = unsafe { Mmio::new(DSI0_BASE as *mut u32) };
//! let config = LinkConfig::default()
//!     .with_lanes(2)
//!     .with_format(PixelFormat::Rgb888);
//! let mut dsi = Dsi::new(port, Variant::Dsi0, config, &STATE, delay)?;
//!
//! // Call `handler.handle()` from the DSI interrupt.
//! let handler = dsi.interrupt_handler();
//!
//! dsi.enable(HertzU32::MHz(500))?;
//! dsi.transfer(&Message::dcs_write(&[0x29]), &mut [])?;
//! ```
//!
//! ## Feature Flags
#![doc = document_features::document_features!()]
#![cfg_attr(not(test), no_std)]

// MUST be the first module
mod fmt;

pub mod config;
pub mod interrupt;
pub mod packet;
mod phy;
pub mod regs;
pub mod timing;
mod transfer;

#[cfg(test)]
mod mock;

use embedded_hal::delay::DelayNs;
use fugit::HertzU32;

pub use self::{
    config::{byte_clock, ConfigError, LinkConfig, ModeFlag, PixelFormat},
    interrupt::{DsiInterrupt, InterruptHandler, IrqReturn, State},
    packet::{DataType, EncodedPacket, Message, PacketPath},
    phy::PhyState,
    regs::{DmaBridge, DmaIndirect, MemcpyChannel, Mmio, RegisterPort, Variant},
    timing::PhyTimings,
};
use self::{
    fmt::Word,
    interrupt::ALWAYS_ENABLED,
    regs::{afec0, ctrl, disp0, disp1, phyc, RegisterMap, ID_VALUE},
};

/// DSI host errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The link configuration is not usable.
    Config(ConfigError),
    /// The message is malformed for its data type.
    InvalidMessage,
    /// The payload does not fit into the FIFOs.
    ExceedingFifo,
    /// The transfer did not complete in time, or the PHY reported a high
    /// speed transmit timeout.
    TimeOut,
    /// The peripheral answered with a different number of bytes than
    /// requested. No bytes were copied.
    ResponseLengthMismatch {
        /// Bytes requested by the caller.
        expected: usize,
        /// Bytes announced by the peripheral.
        received: usize,
    },
    /// The lanes did not confirm the ULPS request. The request was rolled
    /// back and the PHY stays in its previous state.
    UlpsEntryTimeOut,
    /// The lanes did not reach the stop state after the ULPS handshake. The
    /// PHY state is unknown until the next enable.
    StopStateTimeOut,
    /// The ID register does not identify a DSI block.
    UnknownDevice(u32),
    /// The block cannot perform the operation.
    Unsupported,
}

impl core::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Invalid configuration: {e}"),
            Error::InvalidMessage => write!(f, "The message is malformed"),
            Error::ExceedingFifo => write!(f, "The payload exceeds the FIFO size"),
            Error::TimeOut => write!(f, "The transfer timed out"),
            Error::ResponseLengthMismatch { expected, received } => write!(
                f,
                "The peripheral returned {received} bytes, expected {expected}"
            ),
            Error::UlpsEntryTimeOut => write!(f, "Timeout waiting for ULPS entry"),
            Error::StopStateTimeOut => write!(f, "Timeout waiting for the stop state"),
            Error::UnknownDevice(id) => write!(f, "Unknown device ID {id:#010x}"),
            Error::Unsupported => write!(f, "Operation not supported by this block"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(value: ConfigError) -> Self {
        Error::Config(value)
    }
}

/// DSI host driver.
///
/// Owns the register port of one DSI block. Operations must not overlap;
/// callers that share a host between tasks serialize access themselves.
pub struct Dsi<'d, P, D> {
    port: P,
    variant: Variant,
    map: &'static RegisterMap,
    config: LinkConfig,
    state: &'d State,
    delay: D,
    firmware_setup: bool,
    timings: Option<PhyTimings>,
}

impl<'d, P, D> Dsi<'d, P, D>
where
    P: RegisterPort,
    D: DelayNs,
{
    /// Attaches to the block behind `port`.
    ///
    /// Fails if the ID register does not match or `config` does not fit
    /// `variant`. A block that boot firmware left configured is detected and
    /// its link is not torn down by [`disable`](Self::disable).
    pub fn new(
        port: P,
        variant: Variant,
        config: LinkConfig,
        state: &'d State,
        delay: D,
    ) -> Result<Self, Error> {
        config.validate(variant)?;

        let map = variant.map();
        let id = port.read32(map.id);
        if id != ID_VALUE {
            error!(
                "{:?}: ID register reads {}, expected {}",
                variant,
                Word(id),
                Word(ID_VALUE)
            );
            return Err(Error::UnknownDevice(id));
        }

        let firmware_setup = port.read32(map.ctrl) != 0;
        if firmware_setup {
            info!("{:?}: using the link set up by firmware", variant);
        }

        port.write32(map.int_stat, port.read32(map.int_stat));
        port.write32(map.int_en, ALWAYS_ENABLED.as_u32());

        Ok(Self {
            port,
            variant,
            map,
            config,
            state,
            delay,
            firmware_setup,
            timings: None,
        })
    }

    /// The link configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Which of the two DSI blocks this driver runs.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Whether boot firmware configured the block before attach.
    pub fn is_firmware_setup(&self) -> bool {
        self.firmware_setup
    }

    /// Timings programmed by the last [`enable`](Self::enable).
    pub fn timings(&self) -> Option<&PhyTimings> {
        self.timings.as_ref()
    }

    /// Returns the handler to call from the DSI interrupt.
    pub fn interrupt_handler(&self) -> InterruptHandler<'d, P>
    where
        P: Clone,
    {
        InterruptHandler::new(self.port.clone(), self.map, self.state)
    }

    /// Brings the link up with the PHY running at `bit_clock`.
    ///
    /// Resets the block, programs the analog front end and the D-PHY timing,
    /// configures both display engines and ungates the block. Unless boot
    /// firmware owns the link, the lanes are then taken out of ULPS.
    pub fn enable(&mut self, bit_clock: HertzU32) -> Result<(), Error> {
        if bit_clock.raw() == 0 {
            return Err(ConfigError::InvalidBitClock.into());
        }

        let map = self.map;
        let config = self.config;
        let video = config.is_video();

        self.port
            .write32(map.ctrl, ctrl::SOFT_RESET_CFG | map.ctrl_reset_fifos);
        self.port
            .write32(map.ctrl, ctrl::HSDT_EOT_DISABLE | ctrl::RX_LPDT_EOT_DISABLE);

        let mut afec0_word = afec0::PTATADJ.set(7) | afec0::CTATADJ.set(7);
        let mut afec1_word = 0;
        for field in map.afec0_idr {
            afec0_word |= field.set(6);
        }
        for field in map.afec1_idr {
            afec1_word |= field.set(6);
        }
        for (lane, pd) in (1u8..).zip(map.afec0_pd_dlane) {
            if config.lanes <= lane {
                afec0_word |= pd;
            }
        }
        if !video {
            afec0_word |= map.afec0_reset;
        }
        self.port.write32(map.phy_afec0, afec0_word);
        self.port.write32(map.phy_afec1, afec1_word);

        let timings = PhyTimings::compute(bit_clock);
        debug!(
            "{:?}: bit clock {} Hz, UI {} ns, byte clock {} Hz",
            self.variant,
            bit_clock.raw(),
            timings.ui_ns,
            byte_clock(bit_clock).raw()
        );
        let words = timings.registers();
        self.port.write32(map.hs_clt0, words.hs_clt0);
        self.port.write32(map.hs_clt1, words.hs_clt1);
        self.port.write32(map.hs_clt2, words.hs_clt2);
        self.port.write32(map.hs_dlt3, words.hs_dlt3);
        self.port.write32(map.hs_dlt4, words.hs_dlt4);
        self.port.write32(map.hs_dlt5, words.hs_dlt5);
        self.port.write32(map.hs_dlt6, words.hs_dlt6);
        self.port.write32(map.hs_dlt7, words.hs_dlt7);

        let mut phyc_word =
            map.phyc_esc_clk_lpdt.set(timings.lpx - 1) | map.phyc_clane_enable;
        for lane in 0..config.lanes {
            phyc_word |= phyc::dlane_enable(lane);
        }

        self.port.modify32(map.ctrl, |v| v | ctrl::CAL_BYTE);

        // HS transmit timeout disabled. The others count HS clocks.
        self.port.write32(map.hstx_to_cnt, 0);
        self.port.write32(map.lprx_to_cnt, 0x00ff_ffff);
        self.port.write32(map.ta_to_cnt, 100_000);
        self.port.write32(map.pr_to_cnt, 100_000);

        if video {
            self.port.write32(
                map.disp0_ctrl,
                disp0::PIX_CLK_DIV.set(config.pixel_clock_divider())
                    | disp0::PFORMAT.set(config.format.disp0_format())
                    | disp0::LP_STOP_CTRL.set(disp0::LP_STOP_PERFRAME)
                    | disp0::CHANNEL.set(config.channel as u32)
                    | disp0::ST_END
                    | disp0::ENABLE,
            );
        } else {
            self.port
                .write32(map.disp0_ctrl, disp0::COMMAND_MODE | disp0::ENABLE);
        }

        // DISP1 moves long command payloads out of the pixel FIFO.
        self.port.write32(
            map.disp1_ctrl,
            disp1::PFORMAT.set(disp1::PFORMAT_32BIT_LE) | disp1::ENABLE,
        );

        if !config.mode.contains(ModeFlag::ClockNonContinuous) {
            phyc_word |= map.phyc_hs_clk_continuous;
        }
        self.port.write32(map.phyc, phyc_word);

        self.port.modify32(map.ctrl, |v| v | map.ctrl_enable);

        self.timings = Some(timings);

        if self.firmware_setup {
            return Ok(());
        }
        self.ulps_handshake(false)
    }

    /// Takes the link down by parking the lanes in ULPS.
    ///
    /// Nothing is done when boot firmware owns the link, since there is no
    /// way to bring it back up the way firmware did.
    pub fn disable(&mut self) -> Result<(), Error> {
        if self.firmware_setup {
            return Ok(());
        }
        self.ulps_handshake(true)
    }
}
