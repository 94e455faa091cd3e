// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Request planner (§4.F): optimize, split, and PDU-pack tags.
//!
//! No teacher repo in the retrieval pack carries anything resembling PDU
//! packing or tag coalescing; this module is written from the invariants
//! stated directly against the protocol, as a set of pure functions over
//! `Tag` slices, matching the rest of the crate's preference for small,
//! independently testable units.

use crate::codec::{ceil_even, ReadItemSpec, WriteItemSpec};
use crate::constant::{DataType, MAX_ITEMS_PER_PDU};
use crate::error::{Error, Result};
use crate::tag::Tag;

const REQUEST_BUDGET_MARGIN: usize = 19;
const RESPONSE_BUDGET_MARGIN: usize = 14;
const OVERSIZE_MARGIN: usize = 26;
const REQUEST_BYTES_PER_ITEM: usize = 12;

/// Where a single original tag's bytes live inside a planned batch item's
/// payload: `sources[i]` says "bytes [byte_offset, byte_offset+length) of
/// this item's response belong to original tag `tag_index`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemSource {
    pub tag_index: usize,
    pub byte_offset: usize,
    pub length: usize,
}

/// A single planned READ_VAR item plus the original tag(s) it answers for.
#[derive(Debug, Clone)]
pub struct PlannedReadItem {
    pub spec: ReadItemSpec,
    pub sources: Vec<ItemSource>,
}

/// One PDU's worth of READ_VAR items.
#[derive(Debug, Clone, Default)]
pub struct ReadBatch {
    pub items: Vec<PlannedReadItem>,
}

/// A tag whose declared size exceeds what fits in a single PDU response and
/// must instead be read as a header probe followed by budget-sized chunks.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedTag {
    pub tag_index: usize,
    /// Byte budget available for each chunk's raw payload.
    pub chunk_budget: usize,
    /// Size in bytes of the STRING/WSTRING length header (2 or 4).
    pub header_len: usize,
}

/// Planner output for a read request.
#[derive(Debug, Clone, Default)]
pub struct ReadPlan {
    pub batches: Vec<ReadBatch>,
    pub chunked: Vec<ChunkedTag>,
}

/// Per-PDU WRITE_VAR batch: items plus the original tag index each maps to,
/// in the same order as `items`, so per-item return codes can be reported
/// back against the caller's tag list.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub items: Vec<WriteItemSpec>,
    pub tag_indices: Vec<usize>,
}

fn response_bytes_for(byte_size: usize) -> usize {
    4 + ceil_even(byte_size)
}

/// Decide whether `tag` fits a single PDU response, needs STRING/WSTRING
/// chunking, or is simply too large to ever transfer (a fatal `PDUError`).
fn classify(tag: &Tag, pdu_size: u16) -> Result<Option<ChunkedTag>> {
    let budget = pdu_size as usize - OVERSIZE_MARGIN;
    if response_bytes_for(tag.byte_size()) <= budget {
        return Ok(None);
    }
    match tag.data_type() {
        DataType::String => Ok(Some(ChunkedTag {
            tag_index: 0,
            chunk_budget: budget,
            header_len: 2,
        })),
        DataType::WString => Ok(Some(ChunkedTag {
            tag_index: 0,
            chunk_budget: budget,
            header_len: 4,
        })),
        _ => Err(Error::Pdu {
            required: tag.byte_size(),
            available: budget,
        }),
    }
}

/// Merge tags that share area/db/type family and whose byte ranges are
/// adjacent or overlapping into a single coalesced tag spanning the union.
/// Returns `(coalesced_tags, sources_per_coalesced)`, where
/// `sources_per_coalesced[i]` lists every original tag folded into
/// `coalesced_tags[i]` with its offset inside the union.
fn coalesce(tags: &[Tag]) -> Result<(Vec<Tag>, Vec<Vec<ItemSource>>)> {
    let mut order: Vec<usize> = (0..tags.len()).collect();
    order.sort_by_key(|&i| {
        let t = &tags[i];
        (t.memory_area() as u8, t.db_number(), t.start())
    });

    let mut coalesced = Vec::new();
    let mut sources: Vec<Vec<ItemSource>> = Vec::new();

    for idx in order {
        let tag = &tags[idx];
        // BIT and STRING/WSTRING tags are never coalesced: BIT's fixed
        // byte_size(1) makes byte-range math meaningless across multiple
        // bit positions, and STRING/WSTRING's length field isn't a uniform
        // per-element byte count the way the numeric types are.
        let mergeable = !matches!(
            tag.data_type(),
            DataType::Bit | DataType::String | DataType::WString
        );

        let merged = mergeable
            .then(|| coalesced.last_mut())
            .flatten()
            .and_then(|last: &mut Tag| {
                let same_family = last.memory_area() == tag.memory_area()
                    && last.db_number() == tag.db_number()
                    && last.data_type() == tag.data_type();
                if !same_family {
                    return None;
                }
                let last_end = last.start() as u64 + last.byte_size() as u64;
                let tag_end = tag.start() as u64 + tag.byte_size() as u64;
                if tag.start() as u64 > last_end {
                    return None;
                }
                let union_end = last_end.max(tag_end);
                let union_bytes = (union_end - last.start() as u64) as u32;
                let element_unit = last.data_type().byte_size(1) as u32;
                if union_bytes % element_unit != 0 {
                    return None;
                }
                Some(union_bytes / element_unit)
            });

        if let Some(union_len) = merged {
            let last = coalesced.last_mut().unwrap();
            let offset_bytes = (tag.start() - last.start()) as usize;
            let new_tag = Tag::new(
                last.memory_area(),
                last.db_number(),
                last.data_type(),
                last.start(),
                0,
                union_len,
            )
            .map_err(Error::from)?;
            *last = new_tag;
            sources.last_mut().unwrap().push(ItemSource {
                tag_index: idx,
                byte_offset: offset_bytes,
                length: tag.byte_size(),
            });
        } else {
            coalesced.push(tag.clone());
            sources.push(vec![ItemSource {
                tag_index: idx,
                byte_offset: 0,
                length: tag.byte_size(),
            }]);
        }
    }

    Ok((coalesced, sources))
}

fn read_item_spec(tag: &Tag) -> ReadItemSpec {
    ReadItemSpec {
        data_type: tag.data_type(),
        element_count: tag.length() as u16,
        db_number: tag.db_number() as u16,
        area: tag.memory_area(),
        bit_address: tag.bit_address(),
    }
}

/// Plan a set of tags into PDU-bounded READ_VAR batches (§4.F.1/2/3).
pub fn plan_reads(tags: &[Tag], optimize: bool, pdu_size: u16) -> Result<ReadPlan> {
    let mut chunked = Vec::new();
    let mut direct_indices = Vec::new();

    for (i, tag) in tags.iter().enumerate() {
        match classify(tag, pdu_size)? {
            Some(mut c) => {
                c.tag_index = i;
                chunked.push(c);
            }
            None => direct_indices.push(i),
        }
    }

    let direct_tags: Vec<Tag> = direct_indices.iter().map(|&i| tags[i].clone()).collect();

    let (units, mut unit_sources): (Vec<Tag>, Vec<Vec<ItemSource>>) = if optimize {
        coalesce(&direct_tags)?
    } else {
        let units = direct_tags.clone();
        let sources = (0..units.len())
            .map(|i| {
                vec![ItemSource {
                    tag_index: i,
                    byte_offset: 0,
                    length: units[i].byte_size(),
                }]
            })
            .collect();
        (units, sources)
    };

    // `coalesce`/no-op both index sources against `direct_tags` positions;
    // remap those back to the caller's original tag indices.
    for source_group in unit_sources.iter_mut() {
        for source in source_group.iter_mut() {
            source.tag_index = direct_indices[source.tag_index];
        }
    }

    let request_budget = pdu_size as usize - REQUEST_BUDGET_MARGIN;
    let response_budget = pdu_size as usize - RESPONSE_BUDGET_MARGIN;

    let mut batches = Vec::new();
    let mut current = ReadBatch::default();
    let mut current_request_bytes = 0usize;
    let mut current_response_bytes = 0usize;

    for (unit, sources) in units.iter().zip(unit_sources.into_iter()) {
        let item_request = REQUEST_BYTES_PER_ITEM;
        let item_response = response_bytes_for(unit.byte_size());

        let would_overflow = current.items.len() >= MAX_ITEMS_PER_PDU
            || current_request_bytes + item_request > request_budget
            || current_response_bytes + item_response > response_budget;

        if would_overflow && !current.items.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_request_bytes = 0;
            current_response_bytes = 0;
        }

        current.items.push(PlannedReadItem {
            spec: read_item_spec(unit),
            sources,
        });
        current_request_bytes += item_request;
        current_response_bytes += item_response;
    }
    if !current.items.is_empty() {
        batches.push(current);
    }

    Ok(ReadPlan { batches, chunked })
}

/// Compute `(offset, length)` pairs that split `total_len` raw payload bytes
/// into budget-sized chunks, used to plan the chunked STRING/WSTRING reads
/// once the real `cur_len` is known from the header probe.
pub fn chunk_offsets(total_len: usize, budget: usize) -> Vec<(usize, usize)> {
    if total_len == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < total_len {
        let len = budget.min(total_len - offset);
        out.push((offset, len));
        offset += len;
    }
    out
}

/// Build a raw BYTE-array read item covering `[byte_offset, byte_offset +
/// len)` inside `tag`'s area, used for chunked STRING/WSTRING payload reads.
pub fn chunk_read_spec(tag: &Tag, byte_offset: usize, len: usize) -> Result<ReadItemSpec> {
    let element = Tag::new(
        tag.memory_area(),
        tag.db_number(),
        DataType::Byte,
        tag.start() + byte_offset as u32,
        0,
        len as u32,
    )
    .map_err(Error::from)?;
    Ok(read_item_spec(&element))
}

/// Plan a set of `(tag, encoded_payload)` pairs into PDU-bounded WRITE_VAR
/// batches (§4.F.4). Each payload must already be the on-wire encoding for
/// its tag (see `value::encode_value`).
pub fn plan_writes(items: &[(Tag, Vec<u8>)], pdu_size: u16) -> Result<Vec<WriteBatch>> {
    let request_budget = pdu_size as usize - REQUEST_BUDGET_MARGIN;

    let mut batches = Vec::new();
    let mut current = WriteBatch::default();
    let mut current_bytes = 0usize;

    for (i, (tag, payload)) in items.iter().enumerate() {
        let data_bytes = 4 + ceil_even(payload.len());
        let item_bytes = REQUEST_BYTES_PER_ITEM + data_bytes;

        if tag.byte_size() > request_budget - REQUEST_BYTES_PER_ITEM - 4 {
            return Err(Error::Pdu {
                required: tag.byte_size(),
                available: request_budget,
            });
        }

        let would_overflow =
            current.items.len() >= MAX_ITEMS_PER_PDU || current_bytes + item_bytes > request_budget;
        if would_overflow && !current.items.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        let spec = read_item_spec(tag);
        current.items.push(WriteItemSpec {
            data_type: spec.data_type,
            element_count: spec.element_count,
            db_number: spec.db_number,
            area: spec.area,
            bit_address: spec.bit_address,
            payload: payload.clone(),
        });
        current.tag_indices.push(i);
        current_bytes += item_bytes;
    }
    if !current.items.is_empty() {
        batches.push(current);
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::MemoryArea;

    fn int_tag(start: u32) -> Tag {
        Tag::new(MemoryArea::DataBlock, 1, DataType::Int, start, 0, 1).unwrap()
    }

    #[test]
    fn s5_optimize_true_coalesces_into_one_batch() {
        let tags: Vec<Tag> = (0..50).map(|i| int_tag(i * 2)).collect();
        let plan = plan_reads(&tags, true, 240).unwrap();
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].items.len(), 1);
        let item = &plan.batches[0].items[0];
        assert_eq!(item.spec.element_count, 50); // 50 INT elements = 100 bytes
        assert_eq!(item.sources.len(), 50);
    }

    #[test]
    fn s5_optimize_false_splits_into_multiple_batches() {
        let tags: Vec<Tag> = (0..50).map(|i| int_tag(i * 2)).collect();
        let plan = plan_reads(&tags, false, 240).unwrap();
        assert!(plan.batches.len() >= 3);
        for batch in &plan.batches {
            assert!(batch.items.len() <= MAX_ITEMS_PER_PDU);
        }
    }

    #[test]
    fn oversize_non_string_tag_is_a_pdu_error() {
        let tag = Tag::new(MemoryArea::DataBlock, 1, DataType::Byte, 0, 0, 1000).unwrap();
        let err = plan_reads(&[tag], true, 240).unwrap_err();
        assert!(matches!(err, Error::Pdu { .. }));
    }

    #[test]
    fn oversize_string_tag_is_marked_chunked_not_fatal() {
        let tag = Tag::new(MemoryArea::DataBlock, 1, DataType::String, 10, 0, 254).unwrap();
        let plan = plan_reads(&[tag], true, 240).unwrap();
        assert_eq!(plan.chunked.len(), 1);
        assert_eq!(plan.chunked[0].header_len, 2);
        assert!(plan.batches.is_empty());
    }

    #[test]
    fn s6_chunk_offsets_cover_full_declared_length() {
        let offsets = chunk_offsets(254, 214);
        let total: usize = offsets.iter().map(|(_, len)| *len).sum();
        assert_eq!(total, 254);
        assert_eq!(offsets, vec![(0, 214), (214, 40)]);
    }

    #[test]
    fn plan_writes_respects_item_cap() {
        let items: Vec<(Tag, Vec<u8>)> = (0..25)
            .map(|i| (int_tag(i * 2), vec![0x00, 0x01]))
            .collect();
        let batches = plan_writes(&items, 960).unwrap();
        for batch in &batches {
            assert!(batch.items.len() <= MAX_ITEMS_PER_PDU);
        }
        let total_items: usize = batches.iter().map(|b| b.items.len()).sum();
        assert_eq!(total_items, 25);
    }
}
