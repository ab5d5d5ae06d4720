//! In-sequence SDU reassembly shared by the UM and AM receivers
//!
//! Data fields are fed in SN order. A partially assembled SDU is dropped as
//! soon as the next data field does not directly follow the previous one.

use bytes::Bytes;
use common::buffer_pool::{BufferPool, PooledBuffer};
use std::sync::Arc;
use tracing::debug;

use super::header::FramingInfo;
use super::sn::SnSpace;

#[derive(Debug)]
pub struct Reassembler {
    pool: Arc<BufferPool>,
    partial: Option<PooledBuffer>,
    /// SN expected to continue `partial`
    next_sn: Option<u32>,
    /// Discarding the remainder of an SDU already counted as lost
    skipping: bool,
}

impl Reassembler {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            partial: None,
            next_sn: None,
            skipping: false,
        }
    }

    pub fn reset(&mut self) {
        self.partial = None;
        self.next_sn = None;
        self.skipping = false;
    }

    /// Consume the data field of PDU `sn`, pushing completed SDUs to `out`.
    /// Returns the number of SDUs found to be lost.
    pub fn push(
        &mut self,
        space: &SnSpace,
        sn: u32,
        fi: FramingInfo,
        li: &[u16],
        payload: &[u8],
        out: &mut Vec<Bytes>,
    ) -> u64 {
        let mut lost = 0;

        if self.partial.is_some() && self.next_sn != Some(sn) {
            debug!("SN {} does not continue the partial SDU, dropping it", sn);
            self.partial = None;
            self.skipping = true;
            lost += 1;
        }
        self.next_sn = Some(space.inc(sn));

        let segments = split_segments(payload, li);
        let count = segments.len();
        for (i, segment) in segments.into_iter().enumerate() {
            let completes = i + 1 < count || fi.ends_sdu();
            let continuation = i == 0 && !fi.starts_sdu();

            if continuation {
                if self.partial.is_none() {
                    if !self.skipping {
                        debug!("SN {} continues an SDU whose start was lost", sn);
                        lost += 1;
                        self.skipping = true;
                    }
                    if completes {
                        self.skipping = false;
                    }
                    continue;
                }
            } else {
                if self.partial.take().is_some() {
                    debug!("SN {} starts a new SDU before the previous one ended", sn);
                    lost += 1;
                }
                self.skipping = false;
                match self.pool.allocate() {
                    Some(buffer) => self.partial = Some(buffer),
                    None => {
                        debug!("Buffer pool exhausted, dropping SDU starting in SN {}", sn);
                        lost += 1;
                        self.skipping = !completes;
                        continue;
                    }
                }
            }

            let appended = self
                .partial
                .as_mut()
                .is_some_and(|buffer| buffer.try_extend(segment));
            if !appended {
                debug!("SDU reassembled from SN {} exceeds the buffer size", sn);
                self.partial = None;
                lost += 1;
                self.skipping = !completes;
                continue;
            }

            if completes {
                if let Some(buffer) = self.partial.take() {
                    out.push(buffer.freeze());
                }
            }
        }

        lost
    }
}

/// Split a data field into SDU segments using its length indicators
pub fn split_segments<'a>(payload: &'a [u8], li: &[u16]) -> Vec<&'a [u8]> {
    let mut segments = Vec::with_capacity(li.len() + 1);
    let mut rest = payload;
    for &len in li {
        let len = (len as usize).min(rest.len());
        let (head, tail) = rest.split_at(len);
        segments.push(head);
        rest = tail;
    }
    segments.push(rest);
    segments
}
