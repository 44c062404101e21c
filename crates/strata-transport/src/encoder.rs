//! Encoder pipeline: ingests application writes, emits wire packets for a
//! complete group (`spec.md` §4.4).

use crate::codec::{self, CodecParams};
use crate::error::Result;
use crate::group::FecGroup;
use crate::header::{self, BlockType};

/// One fully-framed wire record ready for dispatch: `header || block_slice`.
pub type WireRecord = Vec<u8>;

pub struct Encoder {
    group: FecGroup,
    params: CodecParams,
}

impl Encoder {
    pub fn new(block_bytes: usize, k: u8, r: u8) -> Self {
        codec::init();
        Encoder {
            group: FecGroup::new(block_bytes, k, r),
            params: CodecParams {
                block_bytes,
                original_count: k,
                recovery_count: r,
            },
        }
    }

    /// Ingest one caller message. Returns `Some(records)` once the group
    /// completes (exactly `K + R` wire records, originals first in index
    /// order then recoveries in index order), `None` while still
    /// accumulating.
    pub fn write(&mut self, payload: &[u8]) -> Result<Option<Vec<WireRecord>>> {
        let index = self.group.originals_present();
        self.group.add_original_payload(index, payload)?;

        if self.group.originals_present() < self.group.k() {
            return Ok(None);
        }

        match self.dispatch() {
            Ok(records) => {
                self.group.reset();
                Ok(Some(records))
            }
            Err(e) => {
                self.group.reset();
                Err(e)
            }
        }
    }

    fn dispatch(&mut self) -> Result<Vec<WireRecord>> {
        let originals: Vec<(u8, Vec<u8>)> = self
            .group
            .originals()
            .into_iter()
            .map(|(i, b)| (i, b.to_vec()))
            .collect();
        let refs: Vec<&[u8]> = originals.iter().map(|(_, b)| b.as_slice()).collect();
        let recoveries = codec::encode(&self.params, &refs)?;

        for (i, recovery) in recoveries.iter().enumerate() {
            self.group.add_recovery(i as u8, recovery)?;
        }

        let mut records = Vec::with_capacity(originals.len() + recoveries.len());
        for (index, block) in &originals {
            let size = header::block_size_of_original(block)? as usize;
            let header_byte = header::build(BlockType::Original, *index);
            let mut record = Vec::with_capacity(1 + size);
            record.push(header_byte);
            record.extend_from_slice(&block[..size]);
            records.push(record);
        }
        // The codec produces full `block_bytes`-sized recovery shards (the
        // RS implementation requires uniform shard length across the
        // group), but the wire format only carries `block_bytes - 1` of it
        // (spec.md §4.4/§6) so that `header (1) + recovery` fits the same
        // `pkt_size` budget as a maximally-sized original. The dropped
        // trailing byte is implicitly zero on the decode side: `FecGroup`
        // zero-fills a recovery slot before writing into it, so re-padding
        // happens for free when the truncated block is stored back.
        let wire_recovery_len = self.group.block_bytes() - 1;
        for (index, recovery) in recoveries.iter().enumerate() {
            let header_byte = header::build(BlockType::Recovery, index as u8);
            let mut record = Vec::with_capacity(1 + wire_recovery_len);
            record.push(header_byte);
            record.extend_from_slice(&recovery[..wire_recovery_len]);
            records.push(record);
        }

        Ok(records)
    }

    pub fn k(&self) -> u8 {
        self.group.k()
    }

    pub fn r(&self) -> u8 {
        self.group.r()
    }

    pub fn block_bytes(&self) -> usize {
        self.group.block_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_group_after_k_writes() {
        let mut enc = Encoder::new(64, 10, 4);
        let mut produced = None;
        for i in 0..10u8 {
            let result = enc.write(&[i; 8]).unwrap();
            if i < 9 {
                assert!(result.is_none());
            } else {
                produced = result;
            }
        }
        let records = produced.unwrap();
        // exactly K + R datagrams per invariant 1.
        assert_eq!(records.len(), 14);
    }

    #[test]
    fn original_records_carry_header_and_size_prefixed_payload() {
        let mut enc = Encoder::new(64, 2, 1);
        enc.write(b"ab").unwrap();
        let records = enc.write(b"cd").unwrap().unwrap();
        let (ty, idx) = header::parse(records[0][0]);
        assert_eq!(ty, BlockType::Original);
        assert_eq!(idx, 0);
        assert_eq!(&records[0][1..3], &4u16.to_le_bytes());
        assert_eq!(&records[0][3..5], b"ab");
    }

    #[test]
    fn recovery_records_follow_originals() {
        let mut enc = Encoder::new(64, 2, 1);
        enc.write(b"ab").unwrap();
        let records = enc.write(b"cd").unwrap().unwrap();
        let (ty, idx) = header::parse(records[2][0]);
        assert_eq!(ty, BlockType::Recovery);
        assert_eq!(idx, 0);
    }

    #[test]
    fn recovery_record_wire_length_is_block_bytes_minus_one() {
        // header (1) + recovery (block_bytes - 1) must equal block_bytes,
        // matching the pkt_size budget a maximally-sized original consumes
        // (spec.md §4.4/§6); a full block_bytes recovery shard would
        // overflow that budget by one byte.
        let mut enc = Encoder::new(64, 2, 1);
        enc.write(b"ab").unwrap();
        let records = enc.write(b"cd").unwrap().unwrap();
        assert_eq!(records[2].len(), 64);
    }

    #[test]
    fn zero_length_write_is_accepted() {
        let mut enc = Encoder::new(64, 1, 1);
        let records = enc.write(&[]).unwrap().unwrap();
        assert_eq!(&records[0][1..3], &2u16.to_le_bytes());
    }

    #[test]
    fn group_resets_after_dispatch() {
        let mut enc = Encoder::new(64, 2, 1);
        enc.write(b"ab").unwrap();
        enc.write(b"cd").unwrap();
        assert_eq!(enc.group.originals_present(), 0);
        assert_eq!(enc.group.recoveries_present(), 0);
    }
}
