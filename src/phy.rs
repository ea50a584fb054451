//! ULPS sequencing.
//!
//! The block cannot be gated while it is driving ULPS on the lanes. Entry
//! therefore asks the lanes for ULPS, has the analog front end latch that
//! condition and then lets the digital side fall back to the stop state.
//! Exit runs the same handshake with the latch released.

use embedded_hal::delay::DelayNs;
use fugit::{MicrosDurationU32, MillisDurationU32};

use crate::{
    fmt::Word,
    regs::{phyc, stat, RegisterPort},
    Dsi,
    Error,
};

const HANDSHAKE_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(20);
const POLL_INTERVAL: MicrosDurationU32 = MicrosDurationU32::micros(100);

/// Power state of the lanes, as seen in the status registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhyState {
    /// At least one lane is outside the stop state, typically in high speed
    /// mode.
    Active,
    /// ULPS has been requested but not confirmed by every lane.
    EnteringUlps,
    /// The lanes are held in ULPS by the analog front end.
    Ulps,
    /// ULPS is latched but the lanes are being handed back to the digital
    /// side.
    ExitingUlps,
    /// Every lane is idle in the stop state.
    Stop,
}

/// PHYC and STAT bits covering the clock lane and the configured data lanes.
struct LaneMasks {
    phyc_ulps: u32,
    stat_ulps: u32,
    stat_stop: u32,
}

impl<P, D> Dsi<'_, P, D>
where
    P: RegisterPort,
    D: DelayNs,
{
    fn lane_masks(&self) -> LaneMasks {
        let mut masks = LaneMasks {
            phyc_ulps: self.map.phyc_clane_ulps,
            stat_ulps: stat::PHY_CLOCK_ULPS,
            stat_stop: stat::PHY_CLOCK_STOP,
        };
        for lane in 0..self.config.lanes {
            masks.phyc_ulps |= phyc::dlane_ulps(lane);
            masks.stat_ulps |= stat::data_lane_ulps(lane);
            masks.stat_stop |= stat::data_lane_stop(lane);
        }
        masks
    }

    fn ulps_latched(&self) -> bool {
        self.port.read32(self.map.phy_afec0) & self.map.afec0_latch_ulps != 0
    }

    fn latch_ulps(&self, latch: bool) {
        let bit = self.map.afec0_latch_ulps;
        self.port.modify32(self.map.phy_afec0, |v| {
            if latch {
                v | bit
            } else {
                v & !bit
            }
        });
    }

    /// Polls STAT until every bit of `mask` is set. Returns `false` on
    /// timeout.
    fn wait_for_stat(&mut self, mask: u32) -> bool {
        let max_iterations = HANDSHAKE_TIMEOUT.to_micros() / POLL_INTERVAL.to_micros();
        for _ in 0..=max_iterations {
            if self.port.read32(self.map.stat) & mask == mask {
                return true;
            }
            self.delay.delay_us(POLL_INTERVAL.to_micros());
        }
        false
    }

    /// Derives the lane power state from STAT, PHYC and the ULPS latch.
    pub fn phy_state(&self) -> PhyState {
        let masks = self.lane_masks();
        let requested =
            self.port.read32(self.map.phyc) & masks.phyc_ulps == masks.phyc_ulps;
        let status = self.port.read32(self.map.stat);
        let latched = self.ulps_latched();

        match (requested, latched) {
            (true, true) => PhyState::ExitingUlps,
            (true, false) if status & masks.stat_ulps == masks.stat_ulps => PhyState::Ulps,
            (true, false) => PhyState::EnteringUlps,
            (false, true) => PhyState::Ulps,
            (false, false) if status & masks.stat_stop == masks.stat_stop => PhyState::Stop,
            (false, false) => PhyState::Active,
        }
    }

    /// Parks the lanes in ULPS. Does nothing if they are already latched
    /// there.
    pub fn enter_ulps(&mut self) -> Result<(), Error> {
        if self.ulps_latched() {
            return Ok(());
        }
        self.ulps_handshake(true)
    }

    /// Brings the lanes out of ULPS. Does nothing if ULPS is not latched.
    pub fn exit_ulps(&mut self) -> Result<(), Error> {
        if !self.ulps_latched() {
            return Ok(());
        }
        self.ulps_handshake(false)
    }

    /// Requests ULPS on every lane, sets the latch to `ulps` and returns
    /// the lanes to the stop state.
    pub(crate) fn ulps_handshake(&mut self, ulps: bool) -> Result<(), Error> {
        let map = self.map;
        let masks = self.lane_masks();
        trace!(
            "ULPS {}: PHYC mask {}, STAT mask {}",
            if ulps { "entry" } else { "exit" },
            Word(masks.phyc_ulps),
            Word(masks.stat_ulps)
        );

        self.port.write32(map.stat, masks.stat_ulps);
        self.port.modify32(map.phyc, |v| v | masks.phyc_ulps);
        if !self.wait_for_stat(masks.stat_ulps) {
            warn!(
                "Timeout waiting for DSI ULPS entry: STAT {}",
                Word(self.port.read32(map.stat))
            );
            self.port.modify32(map.phyc, |v| v & !masks.phyc_ulps);
            self.latch_ulps(false);
            return Err(Error::UlpsEntryTimeOut);
        }

        self.latch_ulps(ulps);

        self.port.write32(map.stat, masks.stat_stop);
        self.port.modify32(map.phyc, |v| v & !masks.phyc_ulps);
        if !self.wait_for_stat(masks.stat_stop) {
            warn!(
                "Timeout waiting for DSI STOP entry: STAT {}",
                Word(self.port.read32(map.stat))
            );
            self.port.modify32(map.phyc, |v| v & !masks.phyc_ulps);
            return Err(Error::StopStateTimeOut);
        }

        debug!("ULPS {}", if ulps { "entered" } else { "exited" });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use fugit::HertzU32;

    use super::*;
    use crate::{
        mock::{MockDsi, StdDelay},
        LinkConfig,
        State,
        Variant,
    };

    fn enabled(mock: &MockDsi, lanes: u8) -> Dsi<'static, MockDsi, StdDelay> {
        let state = std::boxed::Box::leak(std::boxed::Box::new(State::new()));
        let config = LinkConfig::default().with_lanes(lanes);
        let mut dsi = Dsi::new(mock.clone(), mock.variant(), config, state, StdDelay).unwrap();
        dsi.enable(HertzU32::MHz(500)).unwrap();
        dsi
    }

    #[test]
    fn entry_latches_and_stops() {
        let mock = MockDsi::new(Variant::Dsi1);
        let map = Variant::Dsi1.map();
        let mut dsi = enabled(&mock, 3);
        mock.clear_log();

        dsi.enter_ulps().unwrap();

        assert!(dsi.ulps_latched());
        assert_eq!(mock.reg(map.phyc) & dsi.lane_masks().phyc_ulps, 0);
        assert_eq!(dsi.phy_state(), PhyState::Ulps);

        // The STAT clears go out before the PHYC requests.
        let log = mock.write_log();
        let stat_clear = log
            .iter()
            .position(|&(o, v)| o == map.stat && v == dsi.lane_masks().stat_ulps)
            .unwrap();
        let request = log
            .iter()
            .rposition(|&(o, v)| o == map.phyc && v & dsi.lane_masks().phyc_ulps != 0)
            .unwrap();
        assert!(stat_clear < request);
    }

    #[test]
    fn entry_twice_is_a_no_op() {
        let mock = MockDsi::new(Variant::Dsi1);
        let mut dsi = enabled(&mock, 2);

        dsi.enter_ulps().unwrap();
        mock.clear_log();
        dsi.enter_ulps().unwrap();

        assert!(mock.write_log().is_empty());
        assert_eq!(dsi.phy_state(), PhyState::Ulps);
    }

    #[test]
    fn exit_releases_latch() {
        let mock = MockDsi::new(Variant::Dsi0);
        let mut dsi = enabled(&mock, 2);

        dsi.enter_ulps().unwrap();
        dsi.exit_ulps().unwrap();

        assert!(!dsi.ulps_latched());
        assert_eq!(dsi.phy_state(), PhyState::Stop);

        mock.clear_log();
        dsi.exit_ulps().unwrap();
        assert!(mock.write_log().is_empty());
    }

    #[test]
    fn entry_timeout_rolls_back() {
        let mock = MockDsi::new(Variant::Dsi1);
        let map = Variant::Dsi1.map();
        let mut dsi = enabled(&mock, 2);
        let phyc_before = mock.reg(map.phyc);

        mock.set_ulps_stuck(true);
        assert_eq!(dsi.enter_ulps(), Err(Error::UlpsEntryTimeOut));

        assert_eq!(mock.reg(map.phyc), phyc_before);
        assert!(!dsi.ulps_latched());
        assert_ne!(dsi.phy_state(), PhyState::Ulps);
    }

    #[test]
    fn stop_timeout_is_reported_as_degraded() {
        let mock = MockDsi::new(Variant::Dsi1);
        let map = Variant::Dsi1.map();
        let mut dsi = enabled(&mock, 1);
        dsi.enter_ulps().unwrap();

        mock.set_stop_stuck(true);
        assert_eq!(dsi.exit_ulps(), Err(Error::StopStateTimeOut));

        // The latch was released and the requests withdrawn, but the lanes
        // never reported stop.
        assert!(!dsi.ulps_latched());
        assert_eq!(mock.reg(map.phyc) & dsi.lane_masks().phyc_ulps, 0);
        assert_eq!(dsi.phy_state(), PhyState::Active);
    }

    #[test]
    fn requested_but_unconfirmed_is_entering() {
        let mock = MockDsi::new(Variant::Dsi1);
        let map = Variant::Dsi1.map();
        let dsi = enabled(&mock, 1);

        mock.set_ulps_stuck(true);
        let masks = dsi.lane_masks();
        mock.set_reg(map.phyc, mock.reg(map.phyc) | masks.phyc_ulps);
        assert_eq!(dsi.phy_state(), PhyState::EnteringUlps);

        mock.set_reg(map.phy_afec0, mock.reg(map.phy_afec0) | map.afec0_latch_ulps);
        assert_eq!(dsi.phy_state(), PhyState::ExitingUlps);
    }

    #[test]
    fn clock_lane_is_always_part_of_the_handshake() {
        let mock = MockDsi::new(Variant::Dsi0);
        let dsi = enabled(&mock, 1);
        let masks = dsi.lane_masks();

        assert_eq!(masks.phyc_ulps, 1 << 9 | 1 << 1);
        assert_eq!(masks.stat_ulps, 1 << 18 | 1 << 25);
        assert_eq!(masks.stat_stop, 1 << 16 | 1 << 24);
    }
}
