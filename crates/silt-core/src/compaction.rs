//! K-way merge of segment streams.
//!
//! This module provides the mechanism for compaction (merging several
//! sorted segment streams into one) without any policy. Deciding *when* to
//! compact, which levels feed the merge and when tombstones may finally be
//! dropped belongs to the layer driving the store; the merge itself keeps
//! every tombstone so that masking still works wherever the output lands.

use std::cmp::Ordering;
use std::io::Read;

use binary_heap_plus::BinaryHeap;
use tracing::debug;

use silt_common::types::Pair;

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::segment::SegmentWrite;

/// One pending pair in the merge, tagged with the cursor it came from.
///
/// `priority` is the cursor's position in the input: 0 is the newest stream.
/// Ordering is (key, priority), so among duplicate keys the newest version
/// surfaces first and the stale ones can be skipped.
struct MergeEntry {
    pair: Pair,
    priority: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.pair.key() == other.pair.key() && self.priority == other.priority
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pair
            .key()
            .cmp(other.pair.key())
            .then(self.priority.cmp(&other.priority))
    }
}

/// Merges `cursors` into `writer`, newest stream first.
///
/// Cursors must be ordered newest to oldest and each must yield strictly
/// ascending keys (which every segment does). The output is a single
/// ascending run where each key appears once, carrying the value from the
/// newest stream that had it. The writer is left open; the caller seals it.
pub fn compact<R: Read>(
    mut cursors: Vec<Cursor<'_, R>>,
    writer: &mut dyn SegmentWrite,
) -> Result<()> {
    let mut heap = BinaryHeap::new_min();

    for (priority, cursor) in cursors.iter_mut().enumerate() {
        match cursor.next() {
            Ok(pair) => heap.push(MergeEntry { pair, priority }),
            Err(Error::EndOfStream) => {}
            Err(e) => return Err(e),
        }
    }

    let mut last_key: Option<String> = None;
    let mut written = 0usize;
    let mut skipped = 0usize;

    while let Some(MergeEntry { pair, priority }) = heap.pop() {
        // Refill from the cursor that just surfaced
        match cursors[priority].next() {
            Ok(next) => heap.push(MergeEntry {
                pair: next,
                priority,
            }),
            Err(Error::EndOfStream) => {}
            Err(e) => return Err(e),
        }

        // Duplicate keys pop newest-first; everything after the first is stale
        if last_key.as_deref() == Some(pair.key()) {
            skipped += 1;
            continue;
        }

        last_key = Some(pair.key().to_string());
        writer.write(&pair)?;
        written += 1;
    }

    debug!(streams = cursors.len(), written, skipped, "merged segment streams");
    Ok(())
}
