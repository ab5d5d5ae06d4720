//! Per-bearer RLC entity
//!
//! A [`Bearer`] wraps one TM, UM or AM entity behind a mutex. Sub-entities
//! never call the upper layer themselves: they record what must be reported in
//! [`Effects`], and the bearer makes the upcalls once the state lock has been
//! released.
//!
//! Effects are queued in a per-bearer outbox before the state lock is
//! dropped. Whichever caller finds the outbox idle drains it with no lock held;
//! every other caller, including one re-entering from an upcall, only enqueues
//! and returns. Upcalls from one bearer therefore keep the order in which they
//! were produced and an upper layer may call back into the RLC freely.

use bytes::Bytes;
use common::buffer_pool::BufferPool;
use common::types::{Lcid, RlcMode, SduId};
use interfaces::{BufferState, RlcUpperInterface, TimerEvent, TimerKind, TimerService};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::am::{AmRx, AmTx};
use super::config::RlcConfig;
use super::metrics::RlcBearerMetrics;
use super::sn::SnSpace;
use super::status::is_control_pdu;
use super::tm::TmEntity;
use super::um::{UmRx, UmTx};
use crate::LayerError;

/// Upcalls produced while the bearer lock is held
#[derive(Debug, Default)]
pub(crate) struct Effects {
    /// Reassembled SDUs, in delivery order
    pub sdus: Vec<Bytes>,
    /// SDUs fully acknowledged by the peer
    pub delivered: Vec<SduId>,
    pub max_retx: bool,
    pub protocol_failure: bool,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.sdus.is_empty() && self.delivered.is_empty() && !self.max_retx && !self.protocol_failure
    }
}

#[derive(Debug)]
enum Mode {
    Tm(TmEntity),
    Um { tx: UmTx, rx: UmRx },
    Am { tx: AmTx, rx: AmRx },
}

impl Mode {
    fn new(
        config: &RlcConfig,
        bearer_id: u64,
        timers: &TimerService,
        pool: &Arc<BufferPool>,
    ) -> Result<Self, LayerError> {
        config.validate()?;
        if config.mode == RlcMode::Tm {
            return Ok(Mode::Tm(TmEntity::new(config.tx_queue_length)));
        }

        let format = config.pdu_format()?;
        let space = SnSpace::new(config.sn_width()?);

        let reordering = timers.create_timer(bearer_id, TimerKind::Reordering);
        reordering.set_duration(config.t_reordering_ms);

        match config.mode {
            RlcMode::Um => Ok(Mode::Um {
                tx: UmTx::new(format, space, config.tx_queue_length),
                rx: UmRx::new(format, space, pool.clone(), reordering),
            }),
            _ => {
                let window = config.window_size()?;
                let poll_retransmit = timers.create_timer(bearer_id, TimerKind::PollRetransmit);
                poll_retransmit.set_duration(config.t_poll_retransmit_ms);
                let status_prohibit = timers.create_timer(bearer_id, TimerKind::StatusProhibit);
                status_prohibit.set_duration(config.t_status_prohibit_ms);

                Ok(Mode::Am {
                    tx: AmTx::new(format, space, window, config, poll_retransmit),
                    rx: AmRx::new(format, space, window, pool.clone(), reordering, status_prohibit),
                })
            }
        }
    }

    /// Apply parameters that do not change the SN layout
    fn reconfigure(&mut self, config: &RlcConfig) -> Result<(), LayerError> {
        match self {
            Mode::Tm(tm) => tm.reconfigure(config.tx_queue_length),
            Mode::Um { tx, rx } => {
                tx.reconfigure(config.tx_queue_length);
                rx.reordering_timer().set_duration(config.t_reordering_ms);
            }
            Mode::Am { tx, rx } => {
                tx.reconfigure(config.window_size()?, config);
                rx.reordering_timer().set_duration(config.t_reordering_ms);
                rx.status_prohibit_timer().set_duration(config.t_status_prohibit_ms);
            }
        }
        Ok(())
    }
}

/// Effect batches waiting for their upcalls
#[derive(Default)]
struct Outbox {
    batches: VecDeque<(Lcid, Effects)>,
    draining: bool,
}

#[derive(Debug)]
struct BearerState {
    lcid: Lcid,
    config: RlcConfig,
    mode: Mode,
    metrics: RlcBearerMetrics,
    suspended: bool,
}

/// One logical channel's RLC entity
pub(crate) struct Bearer {
    id: u64,
    state: Mutex<BearerState>,
    outbox: Mutex<Outbox>,
    upper: Arc<dyn RlcUpperInterface>,
}

impl Bearer {
    pub fn new(
        id: u64,
        lcid: Lcid,
        config: RlcConfig,
        timers: &TimerService,
        pool: &Arc<BufferPool>,
        upper: Arc<dyn RlcUpperInterface>,
    ) -> Result<Self, LayerError> {
        let mode = Mode::new(&config, id, timers, pool)?;
        Ok(Self {
            id,
            state: Mutex::new(BearerState {
                lcid,
                config,
                mode,
                metrics: RlcBearerMetrics::default(),
                suspended: false,
            }),
            outbox: Mutex::new(Outbox::default()),
            upper,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> RlcMode {
        self.state.lock().config.mode
    }

    pub fn lcid(&self) -> Lcid {
        self.state.lock().lcid
    }

    pub fn set_lcid(&self, lcid: Lcid) {
        self.state.lock().lcid = lcid;
    }

    /// Record received SDUs, queue the effects and release the state lock
    fn finish(&self, mut state: MutexGuard<'_, BearerState>, fx: Effects) {
        for sdu in &fx.sdus {
            state.metrics.record_rx_sdu(sdu.len());
        }
        if fx.is_empty() {
            return;
        }

        // queued under the state lock so batches keep their production order
        let claimed = {
            let mut outbox = self.outbox.lock();
            outbox.batches.push_back((state.lcid, fx));
            !std::mem::replace(&mut outbox.draining, true)
        };
        drop(state);

        if claimed {
            self.drain();
        }
    }

    /// Make the queued upcalls until the outbox is empty
    fn drain(&self) {
        loop {
            let (lcid, fx) = {
                let mut outbox = self.outbox.lock();
                match outbox.batches.pop_front() {
                    Some(batch) => batch,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };

            for sdu in fx.sdus {
                self.upper.deliver_sdu(lcid, sdu);
            }
            if !fx.delivered.is_empty() {
                self.upper.notify_delivery(lcid, &fx.delivered);
            }
            if fx.max_retx {
                self.upper.notify_max_retx(lcid);
            }
            if fx.protocol_failure {
                self.upper.notify_protocol_failure(lcid);
            }
        }
    }

    pub fn write_sdu(&self, sdu: Bytes) -> Result<SduId, LayerError> {
        let mut state = self.state.lock();
        let len = sdu.len();
        let id = match &mut state.mode {
            Mode::Tm(tm) => tm.write_sdu(sdu),
            Mode::Um { tx, .. } => tx.write_sdu(sdu),
            Mode::Am { tx, .. } => tx.write_sdu(sdu),
        }?;
        state.metrics.record_tx_sdu(len);
        trace!("{} accepted SDU {:?} ({} bytes)", state.lcid, id, len);
        Ok(id)
    }

    pub fn discard_sdu(&self, id: SduId) -> bool {
        let mut state = self.state.lock();
        let discarded = match &mut state.mode {
            Mode::Tm(tm) => tm.discard_sdu(id),
            Mode::Um { tx, .. } => tx.discard_sdu(id),
            Mode::Am { tx, .. } => tx.discard_sdu(id),
        };
        if discarded {
            state.metrics.num_discarded_sdus += 1;
        }
        debug!("{} discard of SDU {:?}: {}", state.lcid, id, discarded);
        discarded
    }

    pub fn sdu_queue_is_full(&self) -> bool {
        let state = self.state.lock();
        match &state.mode {
            Mode::Tm(tm) => tm.sdu_queue_is_full(),
            Mode::Um { tx, .. } => tx.sdu_queue_is_full(),
            Mode::Am { tx, .. } => tx.sdu_queue_is_full(),
        }
    }

    /// Pending data split into new SDU bytes and prioritized bytes. A
    /// suspended bearer reports nothing.
    pub fn buffer_state(&self) -> BufferState {
        let state = self.state.lock();
        if state.suspended {
            return BufferState::default();
        }
        match &state.mode {
            Mode::Tm(tm) => BufferState {
                new_tx: tm.buffer_state(),
                prio_tx: 0,
            },
            Mode::Um { tx, .. } => BufferState {
                new_tx: tx.buffer_state(),
                prio_tx: 0,
            },
            Mode::Am { tx, rx } => {
                let mut buffered = tx.buffer_state();
                buffered.prio_tx += rx.status_len();
                buffered
            }
        }
    }

    /// Drop every SDU waiting for its first transmission
    pub fn empty_queue(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = match &mut state.mode {
            Mode::Tm(tm) => tm.empty_queue(),
            Mode::Um { tx, .. } => tx.empty_queue(),
            Mode::Am { tx, .. } => tx.empty_queue(),
        };
        state.metrics.num_discarded_sdus += dropped as u64;
        debug!("{} emptied its SDU queue ({} dropped)", state.lcid, dropped);
        dropped
    }

    /// Build at most one PDU of `budget` bytes. A pending status report on an
    /// AM bearer goes first.
    pub fn read_pdu(&self, budget: usize) -> Bytes {
        let mut state = self.state.lock();
        if state.suspended || budget == 0 {
            return Bytes::new();
        }

        let mut fx = Effects::default();
        let BearerState { mode, metrics, .. } = &mut *state;
        let pdu = match mode {
            Mode::Tm(tm) => tm.read_pdu(budget, metrics),
            Mode::Um { tx, .. } => tx.read_pdu(budget, metrics),
            Mode::Am { tx, rx } => {
                let status = if rx.status_ready() {
                    rx.build_status(budget, metrics)
                } else {
                    None
                };
                status.or_else(|| tx.read_pdu(budget, &mut fx, metrics))
            }
        };

        self.finish(state, fx);
        pdu.unwrap_or_default()
    }

    pub fn write_pdu(&self, pdu: &[u8]) {
        let mut state = self.state.lock();
        let mut fx = Effects::default();
        let BearerState { lcid, mode, metrics, .. } = &mut *state;
        match mode {
            Mode::Tm(tm) => {
                metrics.record_rx_pdu(pdu.len());
                tm.write_pdu(pdu, &mut fx);
            }
            Mode::Um { rx, .. } => rx.write_pdu(pdu, &mut fx, metrics),
            Mode::Am { tx, rx } => {
                if pdu.is_empty() {
                    warn!("{} dropped an empty PDU", lcid);
                    metrics.num_malformed_pdus += 1;
                } else if is_control_pdu(pdu) {
                    tx.handle_status(pdu, &mut fx, metrics);
                } else {
                    rx.write_pdu(pdu, &mut fx, metrics);
                }
            }
        }
        self.finish(state, fx);
    }

    /// Act on a timer expiry. Events from a timer that was restarted, stopped
    /// or replaced since they were posted are ignored.
    pub fn handle_timer(&self, event: &TimerEvent) {
        let mut state = self.state.lock();
        let mut fx = Effects::default();
        let BearerState { lcid, mode, metrics, .. } = &mut *state;

        let handled = match (mode, event.kind) {
            (Mode::Um { rx, .. }, TimerKind::Reordering) if rx.reordering_timer().is_current_expiry(event) => {
                rx.on_reordering_expiry(&mut fx, metrics);
                true
            }
            (Mode::Am { rx, .. }, TimerKind::Reordering) if rx.reordering_timer().is_current_expiry(event) => {
                rx.on_reordering_expiry(&mut fx, metrics);
                true
            }
            (Mode::Am { rx, .. }, TimerKind::StatusProhibit)
                if rx.status_prohibit_timer().is_current_expiry(event) =>
            {
                rx.on_status_prohibit_expiry();
                true
            }
            (Mode::Am { tx, .. }, TimerKind::PollRetransmit)
                if tx.poll_retransmit_timer().is_current_expiry(event) =>
            {
                tx.on_poll_retransmit_expiry(&mut fx);
                true
            }
            _ => false,
        };

        if !handled {
            trace!("{} ignored stale {:?} expiry", lcid, event.kind);
        }
        self.finish(state, fx);
    }

    /// Deliver what can still be reassembled, then return every variable to
    /// its initial value and stop the timers
    pub fn reestablish(&self) {
        let mut state = self.state.lock();
        let mut fx = Effects::default();
        let BearerState { lcid, mode, metrics, .. } = &mut *state;
        match mode {
            Mode::Tm(tm) => tm.reestablish(),
            Mode::Um { tx, rx } => {
                tx.reestablish();
                rx.reestablish(&mut fx, metrics);
            }
            Mode::Am { tx, rx } => {
                tx.reestablish();
                rx.reestablish(&mut fx, metrics);
            }
        }
        info!("{} re-established", lcid);
        self.finish(state, fx);
    }

    /// Apply a new configuration. A change of mode or SN width rebuilds the
    /// entity from scratch; anything else keeps the SN state.
    pub fn configure(
        &self,
        config: RlcConfig,
        timers: &TimerService,
        pool: &Arc<BufferPool>,
    ) -> Result<(), LayerError> {
        config.validate()?;
        let mut state = self.state.lock();
        if state.config.mode != config.mode || state.config.sn_field_width != config.sn_field_width {
            state.mode = Mode::new(&config, self.id, timers, pool)?;
            info!(
                "{} rebuilt as {} with {}-bit SN",
                state.lcid, config.mode, config.sn_field_width
            );
        } else {
            state.mode.reconfigure(&config)?;
            debug!("{} reconfigured in place", state.lcid);
        }
        state.config = config;
        Ok(())
    }

    pub fn set_suspended(&self, suspended: bool) {
        let mut state = self.state.lock();
        state.suspended = suspended;
        info!("{} {}", state.lcid, if suspended { "suspended" } else { "resumed" });
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    pub fn metrics(&self) -> RlcBearerMetrics {
        self.state.lock().metrics
    }

    pub fn reset_metrics(&self) {
        self.state.lock().metrics = RlcBearerMetrics::default();
    }
}

impl std::fmt::Debug for Bearer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bearer").field("id", &self.id).finish_non_exhaustive()
    }
}
