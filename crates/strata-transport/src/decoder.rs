//! Decoder pipeline: ingests wire packets, publishes recovered originals in
//! canonical index order (`spec.md` §4.5, including the §4.5.4 publish
//! policy).

use crate::codec::{self, CodecParams, DecodeInput};
use crate::error::{Result, TransportError};
use crate::group::FecGroup;
use crate::header::{self, BlockType};

pub struct Decoder {
    group: FecGroup,
    params: CodecParams,
}

impl Decoder {
    pub fn new(block_bytes: usize, k: u8, r: u8) -> Self {
        codec::init();
        Decoder {
            group: FecGroup::new(block_bytes, k, r),
            params: CodecParams {
                block_bytes,
                original_count: k,
                recovery_count: r,
            },
        }
    }

    /// Ingest one datagram (`header || block`) from the socket. Returns the
    /// original payloads (size-prefix stripped) published as a result, in
    /// ascending canonical index order, oldest group first.
    pub fn ingest(&mut self, datagram: &[u8]) -> Result<Vec<Vec<u8>>> {
        if datagram.is_empty() {
            return Err(TransportError::FecMalformedHeader { type_bit: 0, index: 0 });
        }
        let (ty, index) = header::parse(datagram[0]);
        let block = &datagram[1..];

        match ty {
            BlockType::Original => self.ingest_original(index, block),
            BlockType::Recovery => self.ingest_recovery(index, block),
        }
    }

    fn ingest_original(&mut self, index: u8, block: &[u8]) -> Result<Vec<Vec<u8>>> {
        let k = self.group.k();
        if index >= k {
            return Err(TransportError::FecMalformedHeader { type_bit: 0, index });
        }

        let is_stale_start = self.group.recoveries_present() > 0
            || self.group.originals_present() >= k
            || self.group.is_original_index_present(index);

        let mut published = Vec::new();
        if is_stale_start {
            if self.group.total_present() > 0 && self.group.total_present() < k {
                published.extend(self.publish());
            }
            self.group.reset();
        }

        self.group.set_original_raw(index, block)?;

        if self.group.originals_present() == k {
            published.extend(self.publish());
            self.group.reset();
        }

        Ok(published)
    }

    fn ingest_recovery(&mut self, index: u8, block: &[u8]) -> Result<Vec<Vec<u8>>> {
        let k = self.group.k();
        let r = self.group.r();
        if index >= r {
            return Err(TransportError::FecMalformedHeader { type_bit: 1, index });
        }

        if self.group.total_present() >= k {
            // Extra recoveries beyond what's needed to decode are dropped
            // silently, per spec.md §4.5.
            return Ok(Vec::new());
        }

        self.group.add_recovery(index, block)?;

        if self.group.total_present() != k {
            return Ok(Vec::new());
        }

        let originals: Vec<(u8, Vec<u8>)> = self
            .group
            .originals()
            .into_iter()
            .map(|(i, b)| (i, b.to_vec()))
            .collect();
        let recoveries: Vec<(u8, Vec<u8>)> = self
            .group
            .recoveries()
            .into_iter()
            .map(|(i, b)| (i, b.to_vec()))
            .collect();

        let mut decode_inputs: Vec<DecodeInput> = originals
            .iter()
            .map(|(i, b)| DecodeInput {
                canonical_index: *i,
                is_recovery: false,
                data: b,
            })
            .collect();
        decode_inputs.extend(recoveries.iter().map(|(i, b)| DecodeInput {
            canonical_index: *i,
            is_recovery: true,
            data: b,
        }));

        match codec::decode(&self.params, &decode_inputs) {
            Ok(reconstructed) => {
                for (idx, data) in reconstructed {
                    self.group.set_original_raw(idx, &data)?;
                }
                let published = self.publish();
                self.group.reset();
                Ok(published)
            }
            Err(e) => {
                tracing::warn!(error = %e, "fec decode failed, resetting group without publishing");
                self.group.reset();
                Ok(Vec::new())
            }
        }
    }

    /// §4.5.4 publish policy: for each original position `0..K-1`, look up
    /// by canonical index; if present, strip the leading size prefix and
    /// emit the payload. Missing positions are skipped silently. Ascending
    /// canonical index order.
    fn publish(&self) -> Vec<Vec<u8>> {
        (0..self.group.k())
            .filter_map(|i| self.group.find_original_by_index(i))
            .filter_map(|block| {
                let size = header::block_size_of_original(block).ok()? as usize;
                if size < 2 || size > block.len() {
                    return None;
                }
                Some(block[2..size].to_vec())
            })
            .collect()
    }

    pub fn k(&self) -> u8 {
        self.group.k()
    }

    pub fn r(&self) -> u8 {
        self.group.r()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;

    fn encode_group(k: u8, r: u8, block_bytes: usize) -> Vec<Vec<u8>> {
        let mut enc = Encoder::new(block_bytes, k, r);
        let mut records = Vec::new();
        for i in 0..k {
            if let Some(r) = enc.write(&[i; 4]).unwrap() {
                records = r;
            }
        }
        records
    }

    #[test]
    fn lossless_roundtrip_publishes_all_originals_in_order() {
        let records = encode_group(10, 4, 64);
        let mut dec = Decoder::new(64, 10, 4);
        let mut published = Vec::new();
        for record in &records {
            published.extend(dec.ingest(record).unwrap());
        }
        assert_eq!(published.len(), 10);
        for (i, payload) in published.iter().enumerate() {
            assert_eq!(payload, &vec![i as u8; 4]);
        }
    }

    #[test]
    fn single_loss_recovered_via_decode() {
        let records = encode_group(10, 4, 64);
        let mut dec = Decoder::new(64, 10, 4);
        let mut published = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if i == 3 {
                continue; // drop one original
            }
            published.extend(dec.ingest(record).unwrap());
        }
        assert_eq!(published.len(), 10);
        assert_eq!(published[3], vec![3u8; 4]);
    }

    #[test]
    fn four_losses_recovered_at_r_four() {
        let records = encode_group(10, 4, 64);
        let mut dec = Decoder::new(64, 10, 4);
        let dropped = [0usize, 5, 11, 13];
        let mut published = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if dropped.contains(&i) {
                continue;
            }
            published.extend(dec.ingest(record).unwrap());
        }
        assert_eq!(published.len(), 10);
        for (i, payload) in published.iter().enumerate() {
            assert_eq!(payload, &vec![i as u8; 4]);
        }
    }

    #[test]
    fn five_losses_exceed_capacity_partial_publish_on_next_group_start() {
        let records1 = encode_group(10, 4, 64);
        let mut dec = Decoder::new(64, 10, 4);
        let mut published = Vec::new();
        for (i, record) in records1.iter().enumerate() {
            if i < 5 {
                continue; // drop 5 -> below K=10 recovery threshold
            }
            published.extend(dec.ingest(record).unwrap());
        }
        // Only originals 5..9 arrived as originals; not enough total (5) to
        // decode or complete, so nothing published yet.
        assert!(published.is_empty());

        // Next group's first original triggers stale detection once its
        // index collides with what's already occupied (index 0 was never
        // occupied here, so use an index that *is* occupied: 5).
        let records2 = encode_group(10, 4, 64);
        let published2 = dec.ingest(&records2[5]).unwrap();
        assert_eq!(published2.len(), 5);
        for (i, payload) in published2.iter().enumerate() {
            assert_eq!(payload, &vec![(i + 5) as u8; 4]);
        }
    }

    #[test]
    fn duplicate_original_index_triggers_reset() {
        let records = encode_group(4, 1, 64);
        let mut dec = Decoder::new(64, 4, 1);
        dec.ingest(&records[0]).unwrap();
        dec.ingest(&records[1]).unwrap();
        // index 0 arrives again mid-group -> stale start, partial publish
        // of {0, 1}, reset, then admit the new index-0 block.
        let published = dec.ingest(&records[0]).unwrap();
        assert_eq!(published.len(), 2);
    }

    #[test]
    fn extra_recoveries_beyond_k_are_dropped_silently() {
        let records = encode_group(2, 2, 64);
        let mut dec = Decoder::new(64, 2, 2);
        // both originals arrive -> completes and resets immediately.
        dec.ingest(&records[0]).unwrap();
        let published = dec.ingest(&records[1]).unwrap();
        assert_eq!(published.len(), 2);
        // a stray recovery for the now-empty group is accepted as the
        // start of fresh accumulation, not an error.
        assert!(dec.ingest(&records[2]).unwrap().is_empty());
    }
}
