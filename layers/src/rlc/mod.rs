//! Radio Link Control (RLC) Layer Implementation
//!
//! Implements the LTE RLC sublayer according to 3GPP TS 36.322: Transparent,
//! Unacknowledged and Acknowledged Mode entities, one per logical channel,
//! managed by [`Rlc`].
//!
//! Transport-facing calls (`get_buffer_state`, `read_pdu`, `write_pdu`) never
//! fail: unknown bearers and malformed input are logged and ignored. Only
//! upper-layer and lifecycle operations return `Result`.
//!
//! A registered [`BsrListener`] hears about every call that may change a
//! bearer's buffer state. It is called with no RLC lock held.

pub mod am;
pub mod config;
mod entity;
pub mod header;
pub mod metrics;
mod reassembly;
pub mod sn;
pub mod status;
pub mod tm;
mod tx_queue;
pub mod um;

pub use config::RlcConfig;
pub use metrics::RlcBearerMetrics;

use bytes::Bytes;
use common::buffer_pool::BufferPool;
use common::types::{Lcid, RlcMode, SduId};
use interfaces::{BsrListener, BufferState, RlcUpperInterface, TimerEvent, TimerService};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use config::{DEFAULT_POOL_BUFFERS, MAX_SDU_SIZE};
use entity::Bearer;
use crate::LayerError;

#[derive(Default)]
struct BearerTable {
    by_lcid: HashMap<Lcid, Arc<Bearer>>,
    lcid_by_id: HashMap<u64, Lcid>,
}

/// RLC layer: the set of bearers of one UE context
pub struct Rlc {
    bearers: RwLock<BearerTable>,
    upper: Arc<dyn RlcUpperInterface>,
    bsr: RwLock<Option<Arc<dyn BsrListener>>>,
    timers: TimerService,
    timer_events: Mutex<mpsc::UnboundedReceiver<TimerEvent>>,
    pool: Arc<BufferPool>,
    next_bearer_id: AtomicU64,
}

impl Rlc {
    /// Create an RLC layer with its own timer service and reassembly pool
    pub fn new(upper: Arc<dyn RlcUpperInterface>) -> Self {
        Self::with_pool(upper, BufferPool::new(DEFAULT_POOL_BUFFERS, MAX_SDU_SIZE))
    }

    pub fn with_pool(upper: Arc<dyn RlcUpperInterface>, pool: Arc<BufferPool>) -> Self {
        let (timers, timer_events) = TimerService::new();
        Self {
            bearers: RwLock::new(BearerTable::default()),
            upper,
            bsr: RwLock::new(None),
            timers,
            timer_events: Mutex::new(timer_events),
            pool,
            next_bearer_id: AtomicU64::new(1),
        }
    }

    /// Timer service driving this layer's t-Reordering, t-StatusProhibit and
    /// t-PollRetransmit timers
    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// Register the receiver of buffer status updates, replacing any
    /// previous one
    pub fn set_bsr_listener(&self, listener: Arc<dyn BsrListener>) {
        *self.bsr.write() = Some(listener);
    }

    fn report_bsr(&self, lcid: Lcid, bearer: &Bearer) {
        let listener = self.bsr.read().clone();
        if let Some(listener) = listener {
            listener.update_bsr(lcid, bearer.buffer_state());
        }
    }

    fn bearer(&self, lcid: Lcid) -> Option<Arc<Bearer>> {
        self.bearers.read().by_lcid.get(&lcid).cloned()
    }

    fn require(&self, lcid: Lcid) -> Result<Arc<Bearer>, LayerError> {
        self.bearer(lcid).ok_or(LayerError::BearerNotFound(lcid))
    }

    pub fn add_bearer(&self, lcid: Lcid, config: RlcConfig) -> Result<(), LayerError> {
        let mut table = self.bearers.write();
        if table.by_lcid.contains_key(&lcid) {
            return Err(LayerError::BearerExists(lcid));
        }

        let id = self.next_bearer_id.fetch_add(1, Ordering::Relaxed);
        let mode = config.mode;
        let bearer = Bearer::new(id, lcid, config, &self.timers, &self.pool, self.upper.clone())?;
        table.by_lcid.insert(lcid, Arc::new(bearer));
        table.lcid_by_id.insert(id, lcid);

        info!("Added {} bearer on {}", mode, lcid);
        Ok(())
    }

    pub fn del_bearer(&self, lcid: Lcid) -> Result<(), LayerError> {
        let mut table = self.bearers.write();
        let bearer = table
            .by_lcid
            .remove(&lcid)
            .ok_or(LayerError::BearerNotFound(lcid))?;
        table.lcid_by_id.remove(&bearer.id());
        info!("Removed bearer on {}", lcid);
        Ok(())
    }

    /// Change the configuration of an existing bearer
    pub fn configure(&self, lcid: Lcid, config: RlcConfig) -> Result<(), LayerError> {
        self.require(lcid)?.configure(config, &self.timers, &self.pool)
    }

    pub fn has_bearer(&self, lcid: Lcid) -> bool {
        self.bearers.read().by_lcid.contains_key(&lcid)
    }

    pub fn bearer_mode(&self, lcid: Lcid) -> Option<RlcMode> {
        self.bearer(lcid).map(|bearer| bearer.mode())
    }

    /// Logical channels with a bearer, in ascending order
    pub fn active_lcids(&self) -> Vec<Lcid> {
        let mut lcids: Vec<Lcid> = self.bearers.read().by_lcid.keys().copied().collect();
        lcids.sort();
        lcids
    }

    fn all_bearers(&self) -> Vec<Arc<Bearer>> {
        let table = self.bearers.read();
        let mut bearers: Vec<(Lcid, Arc<Bearer>)> =
            table.by_lcid.iter().map(|(l, b)| (*l, b.clone())).collect();
        bearers.sort_by_key(|(lcid, _)| *lcid);
        bearers.into_iter().map(|(_, b)| b).collect()
    }

    pub fn reestablish(&self, lcid: Lcid) -> Result<(), LayerError> {
        self.require(lcid)?.reestablish();
        Ok(())
    }

    pub fn reestablish_all(&self) {
        for bearer in self.all_bearers() {
            bearer.reestablish();
        }
    }

    /// Remove every bearer
    pub fn reset(&self) {
        let mut table = self.bearers.write();
        let count = table.by_lcid.len();
        table.by_lcid.clear();
        table.lcid_by_id.clear();
        info!("RLC reset, {} bearers removed", count);
    }

    /// Move a bearer to another logical channel, keeping its state
    pub fn change_lcid(&self, old: Lcid, new: Lcid) -> Result<(), LayerError> {
        let mut table = self.bearers.write();
        if table.by_lcid.contains_key(&new) {
            return Err(LayerError::BearerExists(new));
        }
        let bearer = table
            .by_lcid
            .remove(&old)
            .ok_or(LayerError::BearerNotFound(old))?;
        bearer.set_lcid(new);
        table.lcid_by_id.insert(bearer.id(), new);
        table.by_lcid.insert(new, bearer);
        info!("Bearer moved from {} to {}", old, new);
        Ok(())
    }

    pub fn suspend_bearer(&self, lcid: Lcid) -> Result<(), LayerError> {
        self.require(lcid)?.set_suspended(true);
        Ok(())
    }

    pub fn resume_bearer(&self, lcid: Lcid) -> Result<(), LayerError> {
        self.require(lcid)?.set_suspended(false);
        Ok(())
    }

    pub fn is_suspended(&self, lcid: Lcid) -> Result<bool, LayerError> {
        Ok(self.require(lcid)?.is_suspended())
    }

    /// Queue an SDU for transmission
    pub fn write_sdu(&self, lcid: Lcid, sdu: Bytes) -> Result<SduId, LayerError> {
        let bearer = self.require(lcid)?;
        let id = bearer.write_sdu(sdu)?;
        self.report_bsr(lcid, &bearer);
        Ok(id)
    }

    /// Drop a queued SDU that has not started transmission. Returns whether
    /// it was still queued.
    pub fn discard_sdu(&self, lcid: Lcid, sdu: SduId) -> Result<bool, LayerError> {
        let bearer = self.require(lcid)?;
        let discarded = bearer.discard_sdu(sdu);
        if discarded {
            self.report_bsr(lcid, &bearer);
        }
        Ok(discarded)
    }

    /// Drop every SDU of a bearer that has not been completely sent.
    /// Returns how many were dropped.
    pub fn empty_queue(&self, lcid: Lcid) -> Result<usize, LayerError> {
        let bearer = self.require(lcid)?;
        let dropped = bearer.empty_queue();
        self.report_bsr(lcid, &bearer);
        Ok(dropped)
    }

    /// Empty the SDU queue of every bearer
    pub fn empty_all_queues(&self) -> usize {
        self.all_bearers()
            .iter()
            .map(|bearer| {
                let dropped = bearer.empty_queue();
                self.report_bsr(bearer.lcid(), bearer);
                dropped
            })
            .sum()
    }

    pub fn sdu_queue_is_full(&self, lcid: Lcid) -> bool {
        self.bearer(lcid).is_some_and(|bearer| bearer.sdu_queue_is_full())
    }

    /// Bytes the bearer could send now, headers and status reports included
    pub fn get_buffer_state(&self, lcid: Lcid) -> usize {
        self.get_buffer_status(lcid).total()
    }

    /// Buffer state split into new data and retransmissions plus STATUS
    pub fn get_buffer_status(&self, lcid: Lcid) -> BufferState {
        self.bearer(lcid).map_or_else(BufferState::default, |bearer| bearer.buffer_state())
    }

    /// Whether the bearer has anything to send
    pub fn has_data(&self, lcid: Lcid) -> bool {
        !self.get_buffer_status(lcid).is_empty()
    }

    /// Build one PDU of at most `budget` bytes. Empty when nothing fits.
    pub fn read_pdu(&self, lcid: Lcid, budget: usize) -> Bytes {
        match self.bearer(lcid) {
            Some(bearer) => {
                let pdu = bearer.read_pdu(budget);
                self.report_bsr(lcid, &bearer);
                pdu
            }
            None => {
                trace!("read_pdu on unknown {}", lcid);
                Bytes::new()
            }
        }
    }

    /// Hand a PDU received from the lower layer to its bearer
    pub fn write_pdu(&self, lcid: Lcid, pdu: &[u8]) {
        match self.bearer(lcid) {
            Some(bearer) => {
                bearer.write_pdu(pdu);
                self.report_bsr(lcid, &bearer);
            }
            None => warn!("Dropping {} byte PDU for unknown {}", pdu.len(), lcid),
        }
    }

    /// Route one timer expiry to the bearer that owns the timer
    pub fn handle_timer_event(&self, event: &TimerEvent) {
        let bearer = {
            let table = self.bearers.read();
            table.lcid_by_id.get(&event.bearer_id).and_then(|lcid| {
                table.by_lcid.get(lcid).map(|bearer| (*lcid, bearer.clone()))
            })
        };
        match bearer {
            Some((lcid, bearer)) => {
                bearer.handle_timer(event);
                self.report_bsr(lcid, &bearer);
            }
            None => debug!("Timer event for removed bearer {}", event.bearer_id),
        }
    }

    /// Handle every expiry posted so far. Returns the number of events.
    pub fn process_timer_events(&self) -> usize {
        let mut handled = 0;
        loop {
            let event = self.timer_events.lock().try_recv();
            match event {
                Ok(event) => {
                    self.handle_timer_event(&event);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Advance the timer service and handle the resulting expiries
    pub fn tick(&self, elapsed_ms: u32) -> usize {
        self.timers.tick(elapsed_ms);
        self.process_timer_events()
    }

    pub fn get_metrics(&self, lcid: Lcid) -> Option<RlcBearerMetrics> {
        self.bearer(lcid).map(|bearer| bearer.metrics())
    }

    pub fn get_all_metrics(&self) -> Vec<(Lcid, RlcBearerMetrics)> {
        let mut all: Vec<(Lcid, RlcBearerMetrics)> = self
            .bearers
            .read()
            .by_lcid
            .iter()
            .map(|(lcid, bearer)| (*lcid, bearer.metrics()))
            .collect();
        all.sort_by_key(|(lcid, _)| *lcid);
        all
    }

    pub fn reset_metrics(&self, lcid: Lcid) -> Result<(), LayerError> {
        self.require(lcid)?.reset_metrics();
        Ok(())
    }
}
