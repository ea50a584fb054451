//! Register model of a DSI block, used by the unit tests.
//!
//! Models the parts of the block the driver depends on: write-one-to-clear
//! status registers, FIFO capture on packet submission, the lane handshake
//! behind PHYC and STAT, and the response FIFO.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Mutex,
        MutexGuard,
    },
    thread,
    time::Duration,
    vec::Vec,
};

use embedded_hal::delay::DelayNs;
use enumset::EnumSet;

use crate::{
    interrupt::{DsiInterrupt, InterruptHandler},
    packet::{PacketPath, TXPKT1C_CMD_EN},
    regs::{ctrl, phyc, rxpkt1h, stat, RegisterMap, RegisterPort, Variant, ID_VALUE},
};

/// Delay backed by `std::thread::sleep`.
pub(crate) struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(ns.into()));
    }
}

/// How the modelled peripheral answers the next submitted packet.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Transmit done, with interrupt.
    Complete,
    /// Short response carrying two bytes.
    Short([u8; 2]),
    /// Long response with the given payload.
    Long(Vec<u8>),
    /// Nothing happens.
    Silent,
    /// STAT shows the packet as sent but no interrupt is raised.
    DoneWithoutInterrupt,
    /// The PHY flags a high speed transmit timeout.
    HsTimeOut,
    /// A contention error first, transmit done once it is acknowledged.
    LineErrorThenComplete,
}

/// A packet as the block saw it when TXPKT1C was enabled.
#[derive(Debug, Clone)]
pub(crate) struct Submission {
    pub header: u32,
    pub control: u32,
    pub cmd: Vec<u8>,
    pub pix: Vec<u32>,
}

impl Submission {
    pub fn path(&self) -> PacketPath {
        match (self.control >> 8) & 0x3 {
            0 => PacketPath::Short,
            1 => PacketPath::Primary,
            _ => PacketPath::Secondary,
        }
    }

    pub fn expects_response(&self) -> bool {
        (self.control >> 4) & 0x3 == 1
    }
}

struct Inner {
    variant: Variant,
    map: &'static RegisterMap,
    regs: [u32; 64],
    cmd_fifo: Vec<u8>,
    pix_fifo: Vec<u32>,
    rx_fifo: VecDeque<u8>,
    log: Vec<(u32, u32)>,
    submitted: Vec<Submission>,
    reply: Reply,
    ulps_stuck: bool,
    stop_stuck: bool,
    deferred: EnumSet<DsiInterrupt>,
}

impl Inner {
    fn reg(&self, offset: u32) -> u32 {
        self.regs[offset as usize / 4]
    }

    fn reg_mut(&mut self, offset: u32) -> &mut u32 {
        &mut self.regs[offset as usize / 4]
    }

    fn raise(&mut self, bits: EnumSet<DsiInterrupt>) {
        let int_stat = self.map.int_stat;
        *self.reg_mut(int_stat) |= bits.as_u32();
    }

    fn set_stat(&mut self, bits: u32) {
        let offset = self.map.stat;
        *self.reg_mut(offset) |= bits;
    }

    fn clear_stat(&mut self, bits: u32) {
        let offset = self.map.stat;
        *self.reg_mut(offset) &= !bits;
    }

    fn write(&mut self, offset: u32, value: u32) {
        let map = self.map;
        self.log.push((offset, value));

        if offset == map.int_stat {
            *self.reg_mut(offset) &= !value;
            if !self.deferred.is_empty() {
                let deferred = core::mem::take(&mut self.deferred);
                self.raise(deferred);
                self.set_stat(stat::TXPKT1_DONE);
            }
        } else if offset == map.stat {
            *self.reg_mut(offset) &= !value;
        } else if offset == map.cmd_fifo {
            self.cmd_fifo.push(value as u8);
        } else if offset == map.pix_fifo {
            self.pix_fifo.push(value);
        } else if offset == map.ctrl {
            *self.reg_mut(offset) = value & !(map.ctrl_reset_fifos | ctrl::SOFT_RESET_CFG);
            if value & map.ctrl_reset_fifos != 0 {
                self.cmd_fifo.clear();
                self.pix_fifo.clear();
                self.rx_fifo.clear();
            }
        } else if offset == map.phyc {
            *self.reg_mut(offset) = value;
            self.update_lanes();
        } else if offset == map.txpkt1c {
            *self.reg_mut(offset) = value;
            if value & TXPKT1C_CMD_EN != 0 {
                self.submit();
            }
        } else {
            *self.reg_mut(offset) = value;
        }
    }

    fn update_lanes(&mut self) {
        let map = self.map;
        let requests = self.reg(map.phyc);

        let clock = (map.phyc_clane_ulps, stat::PHY_CLOCK_ULPS, stat::PHY_CLOCK_STOP);
        let data = (0..map.max_lanes).map(|lane| {
            (
                phyc::dlane_ulps(lane),
                stat::data_lane_ulps(lane),
                stat::data_lane_stop(lane),
            )
        });

        for (request, ulps, stop) in core::iter::once(clock).chain(data) {
            if requests & request != 0 {
                if !self.ulps_stuck {
                    self.set_stat(ulps);
                }
                self.clear_stat(stop);
            } else {
                self.clear_stat(ulps);
                if !self.stop_stuck {
                    self.set_stat(stop);
                }
            }
        }
    }

    fn submit(&mut self) {
        let map = self.map;
        self.submitted.push(Submission {
            header: self.reg(map.txpkt1h),
            control: self.reg(map.txpkt1c),
            cmd: core::mem::take(&mut self.cmd_fifo),
            pix: core::mem::take(&mut self.pix_fifo),
        });

        let response = DsiInterrupt::PhyDirReverse | DsiInterrupt::RxPkt1;
        let sent = DsiInterrupt::TxPkt1End | DsiInterrupt::TxPkt1Done;

        match self.reply.clone() {
            Reply::Complete => {
                self.raise(sent);
                self.set_stat(stat::TXPKT1_DONE);
            }
            Reply::Short([b0, b1]) => {
                *self.reg_mut(map.rxpkt1h) =
                    rxpkt1h::SHORT_0.set(b0 as u32) | rxpkt1h::SHORT_1.set(b1 as u32);
                self.raise(response);
                self.set_stat(stat::TXPKT1_DONE);
            }
            Reply::Long(bytes) => {
                *self.reg_mut(map.rxpkt1h) =
                    rxpkt1h::PKT_TYPE_LONG | rxpkt1h::BC_PARAM.set(bytes.len() as u32);
                self.rx_fifo = bytes.into();
                self.raise(response);
                self.set_stat(stat::TXPKT1_DONE);
            }
            Reply::Silent => return,
            Reply::DoneWithoutInterrupt => self.set_stat(stat::TXPKT1_DONE),
            Reply::HsTimeOut => {
                self.raise(DsiInterrupt::HsTxTimeOut.into());
                return;
            }
            Reply::LineErrorThenComplete => {
                self.raise(DsiInterrupt::ErrContLp0.into());
                self.deferred = sent;
            }
        }

        *self.reg_mut(map.txpkt1c) &= !TXPKT1C_CMD_EN;
    }
}

/// Shared handle to a modelled DSI block.
#[derive(Clone)]
pub(crate) struct MockDsi {
    inner: Arc<Mutex<Inner>>,
}

impl MockDsi {
    pub fn new(variant: Variant) -> Self {
        let map = variant.map();
        let mut regs = [0; 64];
        regs[map.id as usize / 4] = ID_VALUE;

        Self {
            inner: Arc::new(Mutex::new(Inner {
                variant,
                map,
                regs,
                cmd_fifo: Vec::new(),
                pix_fifo: Vec::new(),
                rx_fifo: VecDeque::new(),
                log: Vec::new(),
                submitted: Vec::new(),
                reply: Reply::Silent,
                ulps_stuck: false,
                stop_stuck: false,
                deferred: EnumSet::empty(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn variant(&self) -> Variant {
        self.lock().variant
    }

    pub fn reg(&self, offset: u32) -> u32 {
        self.lock().reg(offset)
    }

    /// Sets a register without any side effect and without logging.
    pub fn set_reg(&self, offset: u32, value: u32) {
        *self.lock().reg_mut(offset) = value;
    }

    pub fn raise(&self, bits: EnumSet<DsiInterrupt>) {
        self.lock().raise(bits);
    }

    pub fn irq_asserted(&self) -> bool {
        let inner = self.lock();
        inner.reg(inner.map.int_stat) & inner.reg(inner.map.int_en) != 0
    }

    pub fn set_reply(&self, reply: Reply) {
        self.lock().reply = reply;
    }

    pub fn set_ulps_stuck(&self, stuck: bool) {
        self.lock().ulps_stuck = stuck;
    }

    pub fn set_stop_stuck(&self, stuck: bool) {
        self.lock().stop_stuck = stuck;
    }

    pub fn write_log(&self) -> Vec<(u32, u32)> {
        self.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    pub fn writes_to(&self, offset: u32) -> usize {
        self.lock().log.iter().filter(|(o, _)| *o == offset).count()
    }

    /// CTRL writes that reset the FIFOs since the log was last cleared.
    pub fn fifo_resets(&self) -> usize {
        let inner = self.lock();
        let map = inner.map;
        inner
            .log
            .iter()
            .filter(|&&(o, v)| o == map.ctrl && v & map.ctrl_reset_fifos != 0)
            .count()
    }

    pub fn submitted(&self) -> Vec<Submission> {
        self.lock().submitted.clone()
    }
}

impl RegisterPort for MockDsi {
    fn read32(&self, offset: u32) -> u32 {
        let mut inner = self.lock();
        if inner.map.rx_fifo == Some(offset) {
            inner.rx_fifo.pop_front().map_or(0, u32::from)
        } else {
            inner.reg(offset)
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        self.lock().write(offset, value);
    }
}

/// Runs `f` while a second thread services the interrupt line of `mock`.
pub(crate) fn with_interrupts<R>(
    mock: &MockDsi,
    handler: &InterruptHandler<'_, MockDsi>,
    f: impl FnOnce() -> R,
) -> R {
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                if mock.irq_asserted() {
                    handler.handle();
                }
                thread::sleep(Duration::from_micros(20));
            }
        });

        let result = f();
        done.store(true, Ordering::Release);
        result
    })
}
