//! # Interrupt handling
//!
//! The DSI block raises one interrupt line for line errors, protocol
//! timeouts and packet completion. [`InterruptHandler::handle`] must be
//! called from that line's handler. It acknowledges everything it saw with a
//! single write to INT_STAT, logs line errors and completes the transfer
//! that is currently waiting, if any.

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use enumset::{EnumSet, EnumSetType};
use portable_atomic::{AtomicBool, Ordering};

use crate::{
    fmt::Word,
    regs::{RegisterMap, RegisterPort},
    Error,
};

/// Bits of INT_STAT and INT_EN. The discriminant is the bit position.
#[derive(Debug, EnumSetType)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DsiInterrupt {
    TxPkt1End = 0,
    TxPkt1Done = 1,
    TxPkt2End = 2,
    TxPkt2Done = 3,
    RxPkt1 = 4,
    RxPkt2 = 5,
    ErrSyncEsc = 6,
    ErrControl = 7,
    ErrContLp0 = 8,
    ErrContLp1 = 9,
    HsTxTimeOut = 10,
    LpRxTimeOut = 11,
    TurnaroundTimeOut = 12,
    PeripheralResetTimeOut = 13,
    PhyClockStop = 14,
    PhyClockHs = 15,
    PhyClockUlps = 16,
    PhyDirForward = 17,
    PhyD0Lpdt = 18,
    PhyRxTrigger = 19,
    PhyRxLpdt = 20,
    /// The bus turned around and a response is ready.
    PhyDirReverse = 21,
    FifoError = 22,
    PhyD0Stop = 23,
    PhyD0Ulps = 24,
    PhyD1Stop = 25,
    PhyD1Ulps = 26,
    PhyD2Stop = 27,
    PhyD2Ulps = 28,
    PhyD3Stop = 29,
    PhyD3Ulps = 30,
}

/// Line errors and protocol timeouts, kept unmasked at all times.
pub const ALWAYS_ENABLED: EnumSet<DsiInterrupt> = enumset::enum_set!(
    DsiInterrupt::ErrSyncEsc
        | DsiInterrupt::ErrControl
        | DsiInterrupt::ErrContLp0
        | DsiInterrupt::ErrContLp1
        | DsiInterrupt::HsTxTimeOut
        | DsiInterrupt::LpRxTimeOut
        | DsiInterrupt::TurnaroundTimeOut
        | DsiInterrupt::PeripheralResetTimeOut
);

/// Completion sources of a transfer.
pub const COMPLETION: EnumSet<DsiInterrupt> =
    enumset::enum_set!(DsiInterrupt::TxPkt1Done | DsiInterrupt::PhyDirReverse);

impl DsiInterrupt {
    fn description(self) -> &'static str {
        match self {
            DsiInterrupt::ErrSyncEsc => "LP0 escape sync error",
            DsiInterrupt::ErrControl => "control sequence error",
            DsiInterrupt::ErrContLp0 => "LP0 contention",
            DsiInterrupt::ErrContLp1 => "LP1 contention",
            DsiInterrupt::HsTxTimeOut => "HS transmit timeout",
            DsiInterrupt::LpRxTimeOut => "LP receive timeout",
            DsiInterrupt::TurnaroundTimeOut => "turnaround timeout",
            DsiInterrupt::PeripheralResetTimeOut => "peripheral reset timeout",
            _ => "unexpected interrupt",
        }
    }
}

/// Outcome of decoding one INT_STAT word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Line errors and timeouts that were flagged.
    pub errors: EnumSet<DsiInterrupt>,
    /// Result for the waiting transfer, if this event completes it.
    pub completion: Option<Result<(), Error>>,
}

impl Classification {
    /// Whether the event contained anything this driver recognizes.
    pub fn is_handled(&self) -> bool {
        !self.errors.is_empty() || self.completion.is_some()
    }
}

/// Decodes an INT_STAT word.
pub fn classify(status: EnumSet<DsiInterrupt>) -> Classification {
    let errors = status & ALWAYS_ENABLED;

    let completion = if !(status & COMPLETION).is_empty() {
        Some(Ok(()))
    } else if status.contains(DsiInterrupt::HsTxTimeOut) {
        Some(Err(Error::TimeOut))
    } else {
        None
    };

    Classification { errors, completion }
}

/// Whether the line interrupt was raised by this block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqReturn {
    Handled,
    NotHandled,
}

/// Completion slot shared between the transfer path and the interrupt
/// handler.
pub struct State {
    pub(crate) completion: Signal<CriticalSectionRawMutex, Result<(), Error>>,
    pub(crate) pending: AtomicBool,
}

impl State {
    /// Creates an idle slot.
    pub const fn new() -> Self {
        Self {
            completion: Signal::new(),
            pending: AtomicBool::new(false),
        }
    }

    /// Arms the slot for a new transfer, dropping any stale result.
    pub(crate) fn arm(&self) {
        self.completion.reset();
        self.pending.store(true, Ordering::Release);
    }

    /// Stops accepting results for the current transfer.
    pub(crate) fn disarm(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Delivers `result` to the waiting transfer. Only the first result per
    /// transfer is kept.
    pub(crate) fn complete(&self, result: Result<(), Error>) -> bool {
        if self.pending.swap(false, Ordering::AcqRel) {
            self.completion.signal(result);
            true
        } else {
            false
        }
    }

    pub(crate) fn try_take(&self) -> Option<Result<(), Error>> {
        self.completion.try_take()
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt side of a [`Dsi`](crate::Dsi) driver.
pub struct InterruptHandler<'d, P> {
    port: P,
    map: &'static RegisterMap,
    state: &'d State,
}

impl<'d, P: RegisterPort> InterruptHandler<'d, P> {
    pub(crate) fn new(port: P, map: &'static RegisterMap, state: &'d State) -> Self {
        Self { port, map, state }
    }

    /// Services one interrupt event.
    pub fn handle(&self) -> IrqReturn {
        let raw = self.port.read32(self.map.int_stat);
        self.port.write32(self.map.int_stat, raw);
        trace!("INT_STAT {}", Word(raw));

        let classification = classify(EnumSet::from_u32_truncated(raw));

        for error in classification.errors {
            error!("DSI: {}", error.description());
        }

        if let Some(result) = classification.completion {
            if !self.state.complete(result) {
                trace!("completion without a waiting transfer");
            }
        }

        if classification.is_handled() {
            IrqReturn::Handled
        } else {
            IrqReturn::NotHandled
        }
    }
}
