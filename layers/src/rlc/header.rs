//! Data PDU header codec
//!
//! Packs and unpacks UMD and AMD PDU headers (TS 36.322 section 6.2.1):
//!
//! ```text
//! UM, 5-bit SN   FI(2) E(1) SN(5)
//! UM, 10-bit SN  R(3) FI(2) E(1) SN(10)
//! AM, 10-bit SN  D/C(1) RF(1) P(1) FI(2) E(1) SN(10) [LSF(1) SO(15)]
//! AM, 16-bit SN  D/C(1) RF(1) P(1) FI(2) E(1) R(2) SN(16) [LSF(1) SO(15)]
//! ```
//!
//! followed by the `E(1) LI(11)` (or `E(1) LI(15)` for 16-bit AM) chain,
//! zero padded to a byte boundary.

use bitflags::bitflags;
use bytes::BytesMut;
use common::types::SnFieldWidth;
use common::utils::BitWriter;
use nom::bits::complete::take;
use nom::IResult;
use std::ops::{AddAssign, Shl, Shr};

use crate::LayerError;

bitflags! {
    /// Framing Info field
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FramingInfo: u8 {
        /// Last byte of the data field is not the last byte of an SDU
        const NOT_END_ALIGNED = 0b01;
        /// First byte of the data field is not the first byte of an SDU
        const NOT_START_ALIGNED = 0b10;
    }
}

impl FramingInfo {
    pub fn from_alignment(starts_sdu: bool, ends_sdu: bool) -> Self {
        let mut fi = FramingInfo::empty();
        fi.set(FramingInfo::NOT_START_ALIGNED, !starts_sdu);
        fi.set(FramingInfo::NOT_END_ALIGNED, !ends_sdu);
        fi
    }

    pub fn starts_sdu(self) -> bool {
        !self.contains(FramingInfo::NOT_START_ALIGNED)
    }

    pub fn ends_sdu(self) -> bool {
        !self.contains(FramingInfo::NOT_END_ALIGNED)
    }
}

/// Byte range of a re-segmented AMD PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentOffset {
    /// Position of the segment within the original data field
    pub so: u16,
    /// Segment carries the last byte of the original data field (LSF)
    pub last: bool,
}

/// Decoded data PDU header
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataPduHeader {
    pub sn: u32,
    pub fi: FramingInfo,
    /// Poll bit (AM only)
    pub poll: bool,
    /// Segment information when RF is set (AM only)
    pub segment: Option<SegmentOffset>,
    /// Lengths of every concatenated SDU segment but the last
    pub li: Vec<u16>,
}

/// Largest value the 15-bit SO fields can carry
pub const MAX_SEGMENT_OFFSET: u16 = 0x7FFF;

/// Header layout of a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduFormat {
    Um5,
    Um10,
    Am10,
    Am16,
}

type BitInput<'a> = (&'a [u8], usize);

fn bits<O>(input: BitInput<'_>, count: usize) -> IResult<BitInput<'_>, O>
where
    O: From<u8> + AddAssign + Shl<usize, Output = O> + Shr<usize, Output = O>,
{
    take(count)(input)
}

fn flag(input: BitInput<'_>) -> IResult<BitInput<'_>, bool> {
    let (input, bit): (_, u8) = bits(input, 1)?;
    Ok((input, bit == 1))
}

impl PduFormat {
    pub fn for_um(width: SnFieldWidth) -> Result<Self, LayerError> {
        match width {
            SnFieldWidth::Size5 => Ok(PduFormat::Um5),
            SnFieldWidth::Size10 => Ok(PduFormat::Um10),
            other => Err(LayerError::InvalidConfiguration(format!(
                "UM supports 5 or 10 bit SNs, not {}",
                other.bits()
            ))),
        }
    }

    pub fn for_am(width: SnFieldWidth) -> Result<Self, LayerError> {
        match width {
            SnFieldWidth::Size10 => Ok(PduFormat::Am10),
            SnFieldWidth::Size16 => Ok(PduFormat::Am16),
            other => Err(LayerError::InvalidConfiguration(format!(
                "AM supports 10 or 16 bit SNs, not {}",
                other.bits()
            ))),
        }
    }

    pub fn is_am(&self) -> bool {
        matches!(self, PduFormat::Am10 | PduFormat::Am16)
    }

    pub fn sn_bits(&self) -> u8 {
        match self {
            PduFormat::Um5 => 5,
            PduFormat::Um10 | PduFormat::Am10 => 10,
            PduFormat::Am16 => 16,
        }
    }

    pub fn li_bits(&self) -> u8 {
        match self {
            PduFormat::Am16 => 15,
            _ => 11,
        }
    }

    pub fn max_li(&self) -> usize {
        (1usize << self.li_bits()) - 1
    }

    /// Header length without any LI
    pub fn fixed_len(&self, segmented: bool) -> usize {
        let base = match self {
            PduFormat::Um5 => 1,
            PduFormat::Um10 | PduFormat::Am10 => 2,
            PduFormat::Am16 => 3,
        };
        if segmented && self.is_am() {
            base + 2
        } else {
            base
        }
    }

    /// Bytes taken by a chain of `n_li` length indicators
    pub fn li_len(&self, n_li: usize) -> usize {
        let entry_bits = 1 + self.li_bits() as usize;
        (n_li * entry_bits + 7) / 8
    }

    pub fn header_len(&self, n_li: usize, segmented: bool) -> usize {
        self.fixed_len(segmented) + self.li_len(n_li)
    }

    pub fn packed_len(&self, header: &DataPduHeader) -> usize {
        self.header_len(header.li.len(), header.segment.is_some())
    }

    /// Append the packed header to `out`
    pub fn pack(&self, header: &DataPduHeader, out: &mut BytesMut) {
        let mut w = BitWriter::with_capacity(self.packed_len(header));
        let fi = header.fi.bits() as u32;
        let extension = !header.li.is_empty();

        match self {
            PduFormat::Um5 => {
                w.put_bits(fi, 2);
                w.put_flag(extension);
                w.put_bits(header.sn, 5);
            }
            PduFormat::Um10 => {
                w.put_bits(0, 3);
                w.put_bits(fi, 2);
                w.put_flag(extension);
                w.put_bits(header.sn, 10);
            }
            PduFormat::Am10 | PduFormat::Am16 => {
                w.put_flag(true);
                w.put_flag(header.segment.is_some());
                w.put_flag(header.poll);
                w.put_bits(fi, 2);
                w.put_flag(extension);
                if *self == PduFormat::Am16 {
                    w.put_bits(0, 2);
                }
                w.put_bits(header.sn, self.sn_bits());
                if let Some(segment) = header.segment {
                    w.put_flag(segment.last);
                    w.put_bits(segment.so as u32, 15);
                }
            }
        }

        for (i, &li) in header.li.iter().enumerate() {
            w.put_flag(i + 1 < header.li.len());
            w.put_bits(li as u32, self.li_bits());
        }

        out.extend_from_slice(&w.finish());
    }

    /// R bits are skipped without being checked, as a receiver must ignore them
    fn parse<'a>(&self, input: BitInput<'a>) -> IResult<BitInput<'a>, (DataPduHeader, bool)> {
        let mut header = DataPduHeader::default();
        let mut dc = true;

        let (mut input, mut extension) = match self {
            PduFormat::Um5 => {
                let (i, fi): (_, u8) = bits(input, 2)?;
                let (i, e) = flag(i)?;
                let (i, sn): (_, u32) = bits(i, 5)?;
                header.fi = FramingInfo::from_bits_truncate(fi);
                header.sn = sn;
                (i, e)
            }
            PduFormat::Um10 => {
                let (i, _reserved): (_, u8) = bits(input, 3)?;
                let (i, fi): (_, u8) = bits(i, 2)?;
                let (i, e) = flag(i)?;
                let (i, sn): (_, u32) = bits(i, 10)?;
                header.fi = FramingInfo::from_bits_truncate(fi);
                header.sn = sn;
                (i, e)
            }
            PduFormat::Am10 | PduFormat::Am16 => {
                let (i, d) = flag(input)?;
                let (i, rf) = flag(i)?;
                let (i, poll) = flag(i)?;
                let (i, fi): (_, u8) = bits(i, 2)?;
                let (mut i, e) = flag(i)?;
                if *self == PduFormat::Am16 {
                    let (rest, _reserved): (_, u8) = bits(i, 2)?;
                    i = rest;
                }
                let (mut i, sn): (_, u32) = bits(i, self.sn_bits() as usize)?;
                if rf {
                    let (rest, last) = flag(i)?;
                    let (rest, so): (_, u16) = bits(rest, 15)?;
                    header.segment = Some(SegmentOffset { so, last });
                    i = rest;
                }
                dc = d;
                header.poll = poll;
                header.fi = FramingInfo::from_bits_truncate(fi);
                header.sn = sn;
                (i, e)
            }
        };

        while extension {
            let (i, e) = flag(input)?;
            let (i, li): (_, u16) = bits(i, self.li_bits() as usize)?;
            header.li.push(li);
            extension = e;
            input = i;
        }

        Ok((input, (header, dc)))
    }

    /// Decode the header of `pdu`, returning it with the header length.
    /// Anything inconsistent with the PDU length fails without side effects.
    pub fn unpack(&self, pdu: &[u8]) -> Result<(DataPduHeader, usize), LayerError> {
        let (_, (header, dc)) = self
            .parse((pdu, 0))
            .map_err(|_| LayerError::MalformedHeader("truncated header".to_string()))?;

        if self.is_am() && !dc {
            return Err(LayerError::MalformedHeader(
                "control PDU where data PDU expected".to_string(),
            ));
        }

        let header_len = self.packed_len(&header);
        if pdu.len() <= header_len {
            return Err(LayerError::MalformedHeader(format!(
                "no payload after {} byte header",
                header_len
            )));
        }

        if header.li.iter().any(|&li| li == 0) {
            return Err(LayerError::MalformedHeader("zero length indicator".to_string()));
        }

        let payload_len = pdu.len() - header_len;
        let li_total: usize = header.li.iter().map(|&li| li as usize).sum();
        if li_total >= payload_len {
            return Err(LayerError::MalformedHeader(format!(
                "length indicators sum to {} with {} payload bytes",
                li_total, payload_len
            )));
        }

        Ok((header, header_len))
    }
}
