//! STATUS PDU codec
//!
//! ```text
//! D/C(1)=0 CPT(3)=000 ACK_SN(w) E1(1)
//! { NACK_SN(w) E1(1) E2(1) [SOstart(15) SOend(15)] }*
//! ```
//!
//! padded with zero bits to a byte boundary.

use bytes::BytesMut;
use common::utils::BitWriter;
use nom::bits::complete::take;
use nom::IResult;

use super::sn::SnSpace;
use crate::LayerError;

/// SOend value meaning "up to the last byte of the PDU"
pub const SO_END_OF_PDU: u16 = 0x7FFF;

/// Missing byte range of a partially received PDU, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoRange {
    pub start: u16,
    pub end: u16,
}

impl SoRange {
    pub fn reaches_end(&self) -> bool {
        self.end == SO_END_OF_PDU
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackRecord {
    pub sn: u32,
    pub so: Option<SoRange>,
}

impl NackRecord {
    pub fn whole(sn: u32) -> Self {
        Self { sn, so: None }
    }

    pub fn range(sn: u32, start: u16, end: u16) -> Self {
        Self {
            sn,
            so: Some(SoRange { start, end }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusPdu {
    /// First SN not reported as received, and not NACKed
    pub ack_sn: u32,
    pub nacks: Vec<NackRecord>,
}

impl StatusPdu {
    pub fn is_nacked(&self, sn: u32) -> bool {
        self.nacks.iter().any(|n| n.sn == sn)
    }
}

/// Whether the first byte of an AM PDU marks a control PDU
pub fn is_control_pdu(pdu: &[u8]) -> bool {
    pdu.first().is_some_and(|b| b & 0x80 == 0)
}

type BitInput<'a> = (&'a [u8], usize);

fn field(input: BitInput<'_>, count: usize) -> IResult<BitInput<'_>, u32> {
    take(count)(input)
}

/// Packs, unpacks and validates STATUS PDUs for one SN width
#[derive(Debug, Clone, Copy)]
pub struct StatusCodec {
    space: SnSpace,
}

impl StatusCodec {
    pub fn new(space: SnSpace) -> Self {
        Self { space }
    }

    fn sn_bits(&self) -> usize {
        self.space.bits() as usize
    }

    /// Size in bits of the fixed part
    pub fn fixed_bits(&self) -> usize {
        1 + 3 + self.sn_bits() + 1
    }

    /// Size in bits of one NACK record
    pub fn nack_bits(&self, nack: &NackRecord) -> usize {
        self.sn_bits() + 2 + if nack.so.is_some() { 30 } else { 0 }
    }

    pub fn packed_len(&self, status: &StatusPdu) -> usize {
        let bits = self.fixed_bits() + status.nacks.iter().map(|n| self.nack_bits(n)).sum::<usize>();
        (bits + 7) / 8
    }

    pub fn pack(&self, status: &StatusPdu, out: &mut BytesMut) {
        let mut w = BitWriter::with_capacity(self.packed_len(status));
        let sn_bits = self.space.bits();

        w.put_flag(false);
        w.put_bits(0, 3);
        w.put_bits(status.ack_sn, sn_bits);
        w.put_flag(!status.nacks.is_empty());

        for (i, nack) in status.nacks.iter().enumerate() {
            w.put_bits(nack.sn, sn_bits);
            w.put_flag(i + 1 < status.nacks.len());
            w.put_flag(nack.so.is_some());
            if let Some(so) = nack.so {
                w.put_bits(so.start as u32, 15);
                w.put_bits(so.end as u32, 15);
            }
        }

        out.extend_from_slice(&w.finish());
    }

    fn parse<'a>(&self, input: BitInput<'a>) -> IResult<BitInput<'a>, (u32, u32, StatusPdu)> {
        let sn_bits = self.sn_bits();
        let (input, dc) = field(input, 1)?;
        let (input, cpt) = field(input, 3)?;
        let (input, ack_sn) = field(input, sn_bits)?;
        let (mut input, mut more) = field(input, 1)?;

        let mut status = StatusPdu {
            ack_sn,
            nacks: Vec::new(),
        };

        while more == 1 {
            let (i, sn) = field(input, sn_bits)?;
            let (i, e1) = field(i, 1)?;
            let (mut i, e2) = field(i, 1)?;
            let mut nack = NackRecord::whole(sn);
            if e2 == 1 {
                let (rest, start) = field(i, 15)?;
                let (rest, end) = field(rest, 15)?;
                nack.so = Some(SoRange {
                    start: start as u16,
                    end: end as u16,
                });
                i = rest;
            }
            status.nacks.push(nack);
            more = e1;
            input = i;
        }

        Ok((input, (dc, cpt, status)))
    }

    /// Decode a STATUS PDU. Structurally broken or self-inconsistent reports
    /// are rejected as a whole.
    pub fn unpack(&self, pdu: &[u8]) -> Result<StatusPdu, LayerError> {
        let (_, (dc, cpt, status)) = self
            .parse((pdu, 0))
            .map_err(|_| LayerError::MalformedStatusPdu("truncated NACK chain".to_string()))?;

        if dc != 0 {
            return Err(LayerError::MalformedStatusPdu("D/C bit indicates data".to_string()));
        }
        if cpt != 0 {
            return Err(LayerError::MalformedStatusPdu(format!("unknown CPT {}", cpt)));
        }

        self.validate(&status)?;
        Ok(status)
    }

    /// Every NACK lies strictly below ACK_SN within half the SN space, the
    /// NACKs ascend, and SO ranges are ordered.
    pub fn validate(&self, status: &StatusPdu) -> Result<(), LayerError> {
        let half = self.space.half();
        let mut previous: Option<(u32, &NackRecord)> = None;

        for nack in &status.nacks {
            let distance = self.space.offset(status.ack_sn, nack.sn);
            if distance == 0 || distance > half {
                return Err(LayerError::MalformedStatusPdu(format!(
                    "NACK_SN {} not below ACK_SN {}",
                    nack.sn, status.ack_sn
                )));
            }

            if let Some(so) = nack.so {
                if !so.reaches_end() && so.start > so.end {
                    return Err(LayerError::MalformedStatusPdu(format!(
                        "SOstart {} beyond SOend {} for SN {}",
                        so.start, so.end, nack.sn
                    )));
                }
            }

            if let Some((prev_distance, prev)) = previous {
                let ordered = if distance == prev_distance {
                    matches!((prev.so, nack.so), (Some(a), Some(b)) if !a.reaches_end() && a.end < b.start)
                } else {
                    distance < prev_distance
                };
                if !ordered {
                    return Err(LayerError::MalformedStatusPdu(format!(
                        "NACK_SN {} out of order",
                        nack.sn
                    )));
                }
            }
            previous = Some((distance, nack));
        }

        Ok(())
    }
}
