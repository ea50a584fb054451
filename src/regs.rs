//! # Register access
//!
//! The two DSI blocks expose almost the same register file, but offsets and a
//! handful of bit positions moved between them. Rather than branching on the
//! port everywhere, each block is described by a [`RegisterMap`] table that
//! is selected once from the [`Variant`] at construction.
//!
//! All accesses go through a [`RegisterPort`]. [`Mmio`] is plain volatile
//! access. [`DmaIndirect`] is needed on DSI1, whose AXI slave ignores CPU
//! writes: reads are still direct, but every write is copied into the block
//! by a memcpy DMA channel.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::fmt::Word;

/// 32-bit register access to a DSI block.
///
/// Implementations must perform accesses in program order and must not
/// return from [`write32`](Self::write32) before the value has reached the
/// block.
pub trait RegisterPort {
    /// Reads the register at `offset` bytes from the block base.
    fn read32(&self, offset: u32) -> u32;

    /// Writes the register at `offset` bytes from the block base.
    fn write32(&self, offset: u32, value: u32);

    /// Read-modify-write helper.
    fn modify32(&self, offset: u32, f: impl FnOnce(u32) -> u32) {
        let value = self.read32(offset);
        self.write32(offset, f(value));
    }
}

impl<P: RegisterPort + ?Sized> RegisterPort for &P {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }
}

/// Direct memory-mapped access.
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    base: *mut u32,
}

impl Mmio {
    /// Creates a port for the register block mapped at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a mapped DSI register block that stays valid
    /// for as long as the port, and any copy of it, is used.
    pub const unsafe fn new(base: *mut u32) -> Self {
        Self { base }
    }
}

// Every access is a single volatile word access.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl RegisterPort for Mmio {
    fn read32(&self, offset: u32) -> u32 {
        unsafe { self.base.byte_add(offset as usize).read_volatile() }
    }

    fn write32(&self, offset: u32, value: u32) {
        unsafe { self.base.byte_add(offset as usize).write_volatile(value) }
    }
}

/// A DMA channel able to perform memory-to-device copies.
pub trait MemcpyChannel {
    /// Error reported by the DMA engine.
    type Error: core::fmt::Debug;

    /// Places `value` in the channel's coherent bounce word, copies it to the
    /// bus address `dst` and blocks until the engine reports completion.
    fn copy_word(&mut self, dst: u32, value: u32) -> Result<(), Self::Error>;
}

/// The DMA channel shared by every copy of a [`DmaIndirect`] port.
pub struct DmaBridge<C> {
    channel: Mutex<RefCell<C>>,
}

impl<C: MemcpyChannel> DmaBridge<C> {
    /// Wraps a memcpy-capable DMA channel.
    pub const fn new(channel: C) -> Self {
        Self {
            channel: Mutex::new(RefCell::new(channel)),
        }
    }
}

/// Register access that routes writes through a memcpy DMA channel.
pub struct DmaIndirect<'d, C> {
    regs: Mmio,
    bus_base: u32,
    bridge: &'d DmaBridge<C>,
}

impl<C> Clone for DmaIndirect<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for DmaIndirect<'_, C> {}

impl<'d, C: MemcpyChannel> DmaIndirect<'d, C> {
    /// Creates a port reading through `regs` and writing through `bridge`
    /// to the block at bus address `bus_base`.
    pub fn new(regs: Mmio, bus_base: u32, bridge: &'d DmaBridge<C>) -> Self {
        Self {
            regs,
            bus_base,
            bridge,
        }
    }
}

impl<C: MemcpyChannel> RegisterPort for DmaIndirect<'_, C> {
    fn read32(&self, offset: u32) -> u32 {
        self.regs.read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        let result = critical_section::with(|cs| {
            self.bridge
                .channel
                .borrow_ref_mut(cs)
                .copy_word(self.bus_base + offset, value)
        });

        // There is no way to report this to the caller; the write is lost.
        if result.is_err() {
            error!(
                "DMA register write {} -> {} failed",
                Word(offset),
                Word(value)
            );
        }
    }
}

/// A bit field inside a register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Field {
    shift: u8,
    width: u8,
}

impl Field {
    /// Field spanning bits `high..=low`.
    pub(crate) const fn new(high: u8, low: u8) -> Self {
        Self {
            shift: low,
            width: high - low + 1,
        }
    }

    pub(crate) const fn mask(self) -> u32 {
        (((1u64 << self.width) - 1) as u32) << self.shift
    }

    /// Places `value` in the field, truncating bits that do not fit.
    pub(crate) const fn set(self, value: u32) -> u32 {
        (value << self.shift) & self.mask()
    }

    pub(crate) const fn get(self, word: u32) -> u32 {
        (word & self.mask()) >> self.shift
    }
}

/// Which of the two DSI blocks is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Variant {
    /// DSI0, two data lanes, no response FIFO.
    Dsi0,
    /// DSI1, four data lanes. Needs [`DmaIndirect`] register writes.
    Dsi1,
}

impl Variant {
    pub(crate) const fn map(self) -> &'static RegisterMap {
        match self {
            Variant::Dsi0 => &DSI0,
            Variant::Dsi1 => &DSI1,
        }
    }
}

/// Value the ID register reads back on both blocks.
pub(crate) const ID_VALUE: u32 = 0x0064_7369;

/// Offsets and variant-specific bits of one DSI block.
#[derive(Debug)]
pub(crate) struct RegisterMap {
    pub ctrl: u32,
    pub txpkt1c: u32,
    pub txpkt1h: u32,
    pub rxpkt1h: u32,
    pub cmd_fifo: u32,
    pub pix_fifo: u32,
    pub rx_fifo: Option<u32>,
    pub disp0_ctrl: u32,
    pub disp1_ctrl: u32,
    pub int_stat: u32,
    pub int_en: u32,
    pub stat: u32,
    pub hstx_to_cnt: u32,
    pub lprx_to_cnt: u32,
    pub ta_to_cnt: u32,
    pub pr_to_cnt: u32,
    pub phyc: u32,
    pub hs_clt0: u32,
    pub hs_clt1: u32,
    pub hs_clt2: u32,
    pub hs_dlt3: u32,
    pub hs_dlt4: u32,
    pub hs_dlt5: u32,
    pub hs_dlt6: u32,
    pub hs_dlt7: u32,
    pub phy_afec0: u32,
    pub phy_afec1: u32,
    pub id: u32,

    pub max_lanes: u8,

    pub ctrl_reset_fifos: u32,
    pub ctrl_enable: u32,

    pub phyc_esc_clk_lpdt: Field,
    pub phyc_hs_clk_continuous: u32,
    pub phyc_clane_ulps: u32,
    pub phyc_clane_enable: u32,

    pub afec0_latch_ulps: u32,
    pub afec0_reset: u32,
    /// Power-down bit for data lanes 1..=3, zero where the lane does not
    /// exist on this block.
    pub afec0_pd_dlane: [u32; 3],
    /// Drive strength fields living in AFEC0.
    pub afec0_idr: &'static [Field],
    /// Drive strength fields living in AFEC1.
    pub afec1_idr: &'static [Field],
}

pub(crate) static DSI0: RegisterMap = RegisterMap {
    ctrl: 0x00,
    txpkt1c: 0x04,
    txpkt1h: 0x08,
    rxpkt1h: 0x0c,
    cmd_fifo: 0x14,
    pix_fifo: 0x20,
    rx_fifo: None,
    disp0_ctrl: 0x18,
    disp1_ctrl: 0x1c,
    int_stat: 0x24,
    int_en: 0x28,
    stat: 0x2c,
    hstx_to_cnt: 0x30,
    lprx_to_cnt: 0x34,
    ta_to_cnt: 0x38,
    pr_to_cnt: 0x3c,
    phyc: 0x40,
    hs_clt0: 0x44,
    hs_clt1: 0x48,
    hs_clt2: 0x4c,
    hs_dlt3: 0x50,
    hs_dlt4: 0x54,
    hs_dlt5: 0x58,
    hs_dlt6: 0x5c,
    hs_dlt7: 0x60,
    phy_afec0: 0x64,
    phy_afec1: 0x68,
    id: 0x74,

    // PHYC data lanes 2 and 3 share bits with the DSI0 clock lane.
    max_lanes: 2,

    ctrl_reset_fifos: ctrl::CLR_LDF | 1 << 6 | 1 << 5 | 1 << 4 | 1 << 3,
    ctrl_enable: 1 << 0,

    phyc_esc_clk_lpdt: Field::new(17, 12),
    phyc_hs_clk_continuous: 1 << 10,
    phyc_clane_ulps: 1 << 9,
    phyc_clane_enable: 1 << 8,

    afec0_latch_ulps: 1 << 24,
    afec0_reset: 1 << 11,
    afec0_pd_dlane: [1 << 8, 0, 0],
    afec0_idr: &[],
    afec1_idr: &[Field::new(10, 8), Field::new(6, 4), Field::new(2, 0)],
};

pub(crate) static DSI1: RegisterMap = RegisterMap {
    ctrl: 0x00,
    txpkt1c: 0x04,
    txpkt1h: 0x08,
    rxpkt1h: 0x14,
    cmd_fifo: 0x1c,
    pix_fifo: 0x20,
    rx_fifo: Some(0x24),
    disp0_ctrl: 0x28,
    disp1_ctrl: 0x2c,
    int_stat: 0x30,
    int_en: 0x34,
    stat: 0x38,
    hstx_to_cnt: 0x3c,
    lprx_to_cnt: 0x40,
    ta_to_cnt: 0x44,
    pr_to_cnt: 0x48,
    phyc: 0x4c,
    hs_clt0: 0x50,
    hs_clt1: 0x54,
    hs_clt2: 0x58,
    hs_dlt3: 0x5c,
    hs_dlt4: 0x60,
    hs_dlt5: 0x64,
    hs_dlt6: 0x68,
    hs_dlt7: 0x6c,
    phy_afec0: 0x70,
    phy_afec1: 0x74,
    id: 0x8c,

    max_lanes: 4,

    ctrl_reset_fifos: ctrl::CLR_LDF | 1 << 6 | 1 << 5 | 1 << 4,
    ctrl_enable: 1 << 0,

    phyc_esc_clk_lpdt: Field::new(25, 20),
    phyc_hs_clk_continuous: 1 << 18,
    phyc_clane_ulps: 1 << 17,
    phyc_clane_enable: 1 << 16,

    afec0_latch_ulps: 1 << 14,
    afec0_reset: 1 << 13,
    afec0_pd_dlane: [1 << 8, 1 << 9, 1 << 10],
    afec0_idr: &[
        Field::new(31, 29),
        Field::new(28, 26),
        Field::new(25, 23),
        Field::new(22, 20),
        Field::new(19, 17),
    ],
    afec1_idr: &[],
};

/// CTRL bits common to both blocks.
pub(crate) mod ctrl {
    pub const RX_LPDT_EOT_DISABLE: u32 = 1 << 13;
    pub const HSDT_EOT_DISABLE: u32 = 1 << 11;
    pub const SOFT_RESET_CFG: u32 = 1 << 10;
    pub const CAL_BYTE: u32 = 1 << 9;
    pub const CLR_LDF: u32 = 1 << 7;
}

/// PHYC data lane bits, identical on both blocks.
pub(crate) mod phyc {
    pub const fn dlane_enable(lane: u8) -> u32 {
        1 << (4 * lane as u32)
    }

    pub const fn dlane_ulps(lane: u8) -> u32 {
        1 << (4 * lane as u32 + 1)
    }
}

/// AFEC0 bias trims, identical on both blocks.
pub(crate) mod afec0 {
    use super::Field;

    pub const PTATADJ: Field = Field::new(7, 4);
    pub const CTATADJ: Field = Field::new(3, 0);
}

/// STAT bits. These behave like INT_STAT: writing a 1 clears the bit.
pub(crate) mod stat {
    pub const TXPKT1_DONE: u32 = 1 << 1;
    pub const PHY_CLOCK_STOP: u32 = 1 << 16;
    pub const PHY_CLOCK_ULPS: u32 = 1 << 18;

    pub const fn data_lane_stop(lane: u8) -> u32 {
        1 << (24 + 2 * lane as u32)
    }

    pub const fn data_lane_ulps(lane: u8) -> u32 {
        1 << (25 + 2 * lane as u32)
    }
}

/// DISP0_CTRL fields.
pub(crate) mod disp0 {
    use super::Field;

    pub const PIX_CLK_DIV: Field = Field::new(21, 13);
    pub const LP_STOP_CTRL: Field = Field::new(12, 11);
    pub const LP_STOP_PERFRAME: u32 = 2;
    pub const CHANNEL: Field = Field::new(6, 5);
    pub const ST_END: u32 = 1 << 4;
    pub const PFORMAT: Field = Field::new(3, 2);
    pub const COMMAND_MODE: u32 = 1 << 1;
    pub const ENABLE: u32 = 1 << 0;
}

/// DISP1_CTRL fields. DISP1 always runs in command mode and feeds long
/// command payloads from the pixel FIFO.
pub(crate) mod disp1 {
    use super::Field;

    pub const PFORMAT: Field = Field::new(2, 1);
    pub const PFORMAT_32BIT_LE: u32 = 2;
    pub const ENABLE: u32 = 1 << 0;
}

/// RXPKT1H fields.
pub(crate) mod rxpkt1h {
    use super::Field;

    pub const PKT_TYPE_LONG: u32 = 1 << 24;
    pub const BC_PARAM: Field = Field::new(23, 8);
    pub const SHORT_1: Field = Field::new(23, 16);
    pub const SHORT_0: Field = Field::new(15, 8);
}
