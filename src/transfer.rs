//! Command mode transfers.

use embedded_hal::delay::DelayNs;
use fugit::{MicrosDurationU32, MillisDurationU32};

use crate::{
    config::ModeFlag,
    fmt::Word,
    interrupt::{DsiInterrupt, ALWAYS_ENABLED},
    packet::{EncodedPacket, TXPKT1C_CMD_EN},
    regs::{rxpkt1h, stat, RegisterPort},
    Dsi,
    Error,
    Message,
};

const TRANSFER_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(100);
const POLL_INTERVAL: MicrosDurationU32 = MicrosDurationU32::micros(100);

impl<P, D> Dsi<'_, P, D>
where
    P: RegisterPort,
    D: DelayNs,
{
    /// Sends `msg` and, if `rx` is not empty, reads the response into it.
    ///
    /// Blocks until the block reports completion through the interrupt
    /// handler or 100 ms have passed. On failure the packet is cancelled and
    /// the FIFOs are reset, so the next transfer can be attempted right
    /// away.
    ///
    /// Returns the number of response bytes written to `rx`.
    pub fn transfer(&mut self, msg: &Message<'_>, rx: &mut [u8]) -> Result<usize, Error> {
        let low_power = msg.is_low_power() || self.config.mode.contains(ModeFlag::LowPowerMode);
        let packet = EncodedPacket::new(&msg.with_low_power(low_power), rx.len())?;

        // Long responses are drained from a FIFO only DSI1 has.
        if rx.len() > 2 && self.map.rx_fifo.is_none() {
            return Err(Error::Unsupported);
        }

        let map = self.map;
        for &byte in packet.cmd_fifo() {
            self.port.write32(map.cmd_fifo, byte as u32);
        }
        for word in packet.pix_fifo() {
            self.port.write32(map.pix_fifo, word);
        }

        let completion = if packet.expects_response() {
            DsiInterrupt::PhyDirReverse
        } else {
            DsiInterrupt::TxPkt1Done
        };
        self.state.arm();
        self.port.write32(
            map.int_stat,
            (DsiInterrupt::TxPkt1Done | DsiInterrupt::PhyDirReverse).as_u32(),
        );
        // STAT latches DONE too, and the timeout path below trusts it.
        self.port.write32(map.stat, stat::TXPKT1_DONE);
        self.port
            .write32(map.int_en, (ALWAYS_ENABLED | completion).as_u32());

        self.port.write32(map.txpkt1h, packet.header());
        self.port.write32(map.txpkt1c, packet.control());

        let result = self.wait_for_completion();
        self.state.disarm();
        self.port.write32(map.int_en, ALWAYS_ENABLED.as_u32());

        result
            .and_then(|_| self.read_response(rx))
            .inspect_err(|e| self.reset_after_failure(e))
    }

    fn wait_for_completion(&mut self) -> Result<(), Error> {
        let max_iterations = TRANSFER_TIMEOUT.to_micros() / POLL_INTERVAL.to_micros();
        for _ in 0..max_iterations {
            if let Some(result) = self.state.try_take() {
                return result;
            }
            self.delay.delay_us(POLL_INTERVAL.to_micros());
        }
        if let Some(result) = self.state.try_take() {
            return result;
        }

        let status = self.port.read32(self.map.stat);
        error!(
            "Transfer interrupt wait timeout, INT_STAT: {}, STAT: {}",
            Word(self.port.read32(self.map.int_stat)),
            Word(status)
        );

        if status & stat::TXPKT1_DONE != 0 {
            info!("STAT reports DONE, though");
            Ok(())
        } else {
            Err(Error::TimeOut)
        }
    }

    fn read_response(&mut self, rx: &mut [u8]) -> Result<usize, Error> {
        if rx.is_empty() {
            return Ok(0);
        }

        let header = self.port.read32(self.map.rxpkt1h);
        trace!("RXPKT1H {}", Word(header));

        if header & rxpkt1h::PKT_TYPE_LONG != 0 {
            let received = rxpkt1h::BC_PARAM.get(header) as usize;
            if received != rx.len() {
                error!("DSI returned {}b, expecting {}b", received, rx.len());
                return Err(Error::ResponseLengthMismatch {
                    expected: rx.len(),
                    received,
                });
            }

            let fifo = self.map.rx_fifo.ok_or(Error::Unsupported)?;
            for byte in rx.iter_mut() {
                *byte = self.port.read32(fifo) as u8;
            }
            Ok(rx.len())
        } else {
            rx[0] = rxpkt1h::SHORT_0.get(header) as u8;
            if rx.len() > 1 {
                rx[1] = rxpkt1h::SHORT_1.get(header) as u8;
                Ok(2)
            } else {
                Ok(1)
            }
        }
    }

    fn reset_after_failure(&mut self, error: &Error) {
        error!("DSI transfer failed, resetting: {:?}", error);

        let map = self.map;
        self.port.modify32(map.txpkt1c, |v| v & !TXPKT1C_CMD_EN);
        self.delay.delay_us(1);
        self.port.modify32(map.ctrl, |v| v | map.ctrl_reset_fifos);
        self.port.write32(map.txpkt1c, 0);
        self.port.write32(map.int_en, ALWAYS_ENABLED.as_u32());
    }
}
