//! # PHY timing
//!
//! D-PHY timing parameters are specified as a minimum wall-clock duration
//! plus a minimum number of unit intervals. The high-speed counters of the
//! block tick in byte clocks, so every high-speed value is rounded up to a
//! multiple of 8 UI. Low-power values are counted on the fixed 100 MHz
//! escape clock instead.
//!
//! Nothing here touches hardware. [`PhyTimings`] is always computed as a
//! whole from a bit clock and written out as a whole by the enable sequence.

use fugit::HertzU32;

use crate::regs::Field;

/// Escape clock feeding the low-power state machines.
pub const ESCAPE_CLOCK: HertzU32 = HertzU32::MHz(100);

const ESCAPE_PERIOD_NS: u32 = 1_000_000_000 / ESCAPE_CLOCK.raw();

/// Duration of one unit interval, rounded up to whole nanoseconds.
///
/// Lanes are double data rate, so one UI is half a period of the bit clock.
/// A zero rate is treated as 1 Hz.
pub fn ui_duration_ns(bit_clock: HertzU32) -> u32 {
    500_000_000u32.div_ceil(bit_clock.raw().max(1))
}

/// High-speed counter value for a minimum of `ns` nanoseconds plus `ui`
/// unit intervals.
pub fn hs_timing(ui_ns: u32, ns: u32, ui: u32) -> u32 {
    ui.saturating_add(ns.div_ceil(ui_ns.max(1)))
        .next_multiple_of(8)
}

/// Escape clock cycles covering at least `ns` nanoseconds.
pub fn esc_timing(ns: u32) -> u32 {
    ns.div_ceil(ESCAPE_PERIOD_NS)
}

/// Every timing count programmed by the enable sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhyTimings {
    /// Unit interval the high-speed counts were derived from.
    pub ui_ns: u32,

    pub clk_zero: u32,
    pub clk_pre: u32,
    pub clk_prepare: u32,
    pub clk_trail: u32,
    pub clk_post: u32,
    /// Wakeup from ULPS, in high-speed units.
    pub wakeup: u32,

    pub hs_exit: u32,
    pub hs_zero: u32,
    pub hs_prepare: u32,
    pub hs_trail: u32,
    /// LPX expressed in high-speed units.
    pub hs_lpx: u32,
    pub init: u32,

    /// LPX in escape clock cycles.
    pub lpx: u32,
    pub ta_get: u32,
    pub ta_sure: u32,
    pub ta_go: u32,
    /// Low-power wakeup, in escape clock cycles.
    pub lp_wakeup: u32,
}

impl PhyTimings {
    /// Derives the full set of counts for `bit_clock`.
    pub fn compute(bit_clock: HertzU32) -> Self {
        let ui_ns = ui_duration_ns(bit_clock);
        let hs = |ns, ui| hs_timing(ui_ns, ns, ui);
        let lpx = esc_timing(60);

        Self {
            ui_ns,

            clk_zero: hs(262, 0),
            clk_pre: hs(0, 8),
            clk_prepare: hs(38, 0),
            clk_trail: hs(60, 0),
            clk_post: hs(60, 52),
            wakeup: hs(1_000_000, 0),

            hs_exit: hs(100, 0),
            hs_zero: hs(105, 6),
            hs_prepare: hs(40, 4),
            hs_trail: hs(0, 8).max(hs(60, 4)),
            hs_lpx: hs(lpx * ESCAPE_PERIOD_NS, 0),
            init: hs(1000, 5000),

            lpx,
            ta_get: lpx * 5,
            ta_sure: lpx,
            ta_go: lpx * 4,
            lp_wakeup: esc_timing(1_000_000),
        }
    }

    /// Packs the counts into the HS_CLT0..HS_DLT7 register words.
    pub(crate) fn registers(&self) -> TimingRegisters {
        TimingRegisters {
            hs_clt0: CLT0_CZERO.set(self.clk_zero)
                | CLT0_CPRE.set(self.clk_pre)
                | CLT0_CPREP.set(self.clk_prepare),
            hs_clt1: CLT1_CTRAIL.set(self.clk_trail) | CLT1_CPOST.set(self.clk_post),
            hs_clt2: CLT2_WUP.set(self.wakeup),
            hs_dlt3: DLT3_EXIT.set(self.hs_exit)
                | DLT3_ZERO.set(self.hs_zero)
                | DLT3_PRE.set(self.hs_prepare),
            hs_dlt4: DLT4_LPX.set(self.hs_lpx)
                | DLT4_TRAIL.set(self.hs_trail)
                | DLT4_ANLAT.set(0),
            hs_dlt5: DLT5_INIT.set(self.init),
            hs_dlt6: DLT6_TA_GET.set(self.ta_get)
                | DLT6_TA_SURE.set(self.ta_sure)
                | DLT6_TA_GO.set(self.ta_go)
                | DLT6_LP_LPX.set(self.lpx),
            hs_dlt7: DLT7_LP_WUP.set(self.lp_wakeup),
        }
    }
}

pub(crate) struct TimingRegisters {
    pub hs_clt0: u32,
    pub hs_clt1: u32,
    pub hs_clt2: u32,
    pub hs_dlt3: u32,
    pub hs_dlt4: u32,
    pub hs_dlt5: u32,
    pub hs_dlt6: u32,
    pub hs_dlt7: u32,
}

const CLT0_CZERO: Field = Field::new(26, 18);
const CLT0_CPRE: Field = Field::new(17, 9);
const CLT0_CPREP: Field = Field::new(8, 0);
const CLT1_CTRAIL: Field = Field::new(17, 9);
const CLT1_CPOST: Field = Field::new(8, 0);
const CLT2_WUP: Field = Field::new(23, 0);
const DLT3_EXIT: Field = Field::new(26, 18);
const DLT3_ZERO: Field = Field::new(17, 9);
const DLT3_PRE: Field = Field::new(8, 0);
const DLT4_ANLAT: Field = Field::new(22, 18);
const DLT4_TRAIL: Field = Field::new(17, 9);
const DLT4_LPX: Field = Field::new(8, 0);
const DLT5_INIT: Field = Field::new(23, 0);
const DLT6_TA_GET: Field = Field::new(31, 24);
const DLT6_TA_SURE: Field = Field::new(23, 16);
const DLT6_TA_GO: Field = Field::new(15, 8);
const DLT6_LP_LPX: Field = Field::new(7, 0);
const DLT7_LP_WUP: Field = Field::new(23, 0);

#[cfg(test)]
mod test {
    use super::*;

    const RATES_MHZ: [u32; 9] = [50, 100, 162, 250, 333, 500, 648, 800, 1000];

    #[test]
    fn unit_interval_at_500mhz() {
        assert_eq!(ui_duration_ns(HertzU32::MHz(500)), 1);
        assert_eq!(hs_timing(1, 38, 0), 40);
        assert_eq!(hs_timing(1, 40, 0), 40);
        assert_eq!(hs_timing(1, 0, 8), 8);
        assert_eq!(hs_timing(1, 0, 0), 0);
    }

    #[test]
    fn unit_interval_rounds_up() {
        assert_eq!(ui_duration_ns(HertzU32::MHz(250)), 2);
        assert_eq!(ui_duration_ns(HertzU32::MHz(300)), 2);
        assert_eq!(ui_duration_ns(HertzU32::MHz(1000)), 1);
        assert_eq!(ui_duration_ns(HertzU32::Hz(0)), 500_000_000);
    }

    #[test]
    fn escape_counts() {
        assert_eq!(esc_timing(60), 6);
        assert_eq!(esc_timing(61), 7);
        assert_eq!(esc_timing(1_000_000), 100_000);
    }

    #[test]
    fn high_speed_counts_are_byte_aligned() {
        for mhz in RATES_MHZ {
            let ui_ns = ui_duration_ns(HertzU32::MHz(mhz));
            for (ns, ui) in [(0, 0), (38, 0), (60, 52), (105, 6), (262, 0), (1000, 5000)] {
                assert_eq!(hs_timing(ui_ns, ns, ui) % 8, 0);
            }
        }
    }

    #[test]
    fn high_speed_counts_grow_with_bit_clock() {
        for ns in [38, 60, 100, 262, 1_000_000] {
            let counts = RATES_MHZ.map(|mhz| hs_timing(ui_duration_ns(HertzU32::MHz(mhz)), ns, 0));
            assert!(counts.windows(2).all(|w| w[0] <= w[1]), "{ns} ns: {counts:?}");
        }
    }

    #[test]
    fn bundle_at_500mhz() {
        let t = PhyTimings::compute(HertzU32::MHz(500));

        assert_eq!(t.ui_ns, 1);
        assert_eq!(t.clk_zero, 264);
        assert_eq!(t.clk_pre, 8);
        assert_eq!(t.clk_prepare, 40);
        assert_eq!(t.clk_trail, 64);
        assert_eq!(t.clk_post, 112);
        assert_eq!(t.wakeup, 1_000_000);
        assert_eq!(t.hs_exit, 104);
        assert_eq!(t.hs_zero, 112);
        assert_eq!(t.hs_prepare, 48);
        assert_eq!(t.hs_trail, 64);
        assert_eq!(t.hs_lpx, 64);
        assert_eq!(t.init, 6000);
        assert_eq!((t.lpx, t.ta_get, t.ta_sure, t.ta_go), (6, 30, 6, 24));
        assert_eq!(t.lp_wakeup, 100_000);
    }

    #[test]
    fn register_packing() {
        let t = PhyTimings::compute(HertzU32::MHz(500));
        let r = t.registers();

        assert_eq!(r.hs_clt0, 264 << 18 | 8 << 9 | 40);
        assert_eq!(r.hs_clt1, 64 << 9 | 112);
        assert_eq!(r.hs_clt2, 1_000_000);
        assert_eq!(r.hs_dlt3, 104 << 18 | 112 << 9 | 48);
        assert_eq!(r.hs_dlt4, 64 << 9 | 64);
        assert_eq!(r.hs_dlt5, 6000);
        assert_eq!(r.hs_dlt6, 30 << 24 | 6 << 16 | 24 << 8 | 6);
        assert_eq!(r.hs_dlt7, 100_000);
    }
}
