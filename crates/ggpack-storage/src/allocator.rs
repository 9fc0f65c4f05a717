//! Per-bundle slot tables and free-space allocation.
//!
//! A slot table describes the extracted image of one stored bundle: the live
//! slots referenced by index entries, the free gaps between them, and the
//! tail gap from the end of the last live slot to the declared bundle size.
//! Index entries that share an offset are aliases of one slot and always
//! move together.
//!
//! Placement policy for a payload of `L` bytes replacing slot `(pos, len)`:
//!
//! 1. `L == len`: rewrite in place.
//! 2. First interior gap with at least `L` bytes.
//! 3. `L < len`: rewrite in place; the excess becomes free space.
//! 4. Tail gap with at least `L` bytes.
//! 5. Grow the bundle: place at the tail and extend the declared size to
//!    `max(tail + L * factor, tail + minimum)`.
//!
//! Whenever a slot moves, its old span is freed and merged with adjacent
//! gaps. Sum of gap lengths plus live slot lengths always equals the
//! declared size.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{Result, StorageError};

/// A span within an extracted bundle (offset + length).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Byte offset within the bundle.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
}

impl Span {
    /// End offset (exclusive).
    pub const fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Check if two spans overlap.
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Index entry referencing a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    /// Index image position of the file table entry.
    pub entry_position: usize,
    /// Catalog path, when the index names this entry.
    pub path: Option<String>,
}

/// Live slot and the entries sharing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Occupied span.
    pub span: Span,
    /// Entries pointing at the span.
    pub aliases: Vec<Alias>,
}

/// How a placement was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementKind {
    /// Written over the existing slot.
    InPlace,
    /// Moved into an interior gap.
    Gap,
    /// Moved into the tail gap.
    Tail,
    /// Moved to the tail after growing the bundle.
    Grown,
}

/// Result of an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Where the payload goes.
    pub offset: u64,
    /// Payload length.
    pub length: u64,
    /// Previous slot.
    pub previous: Span,
    /// Policy step that produced the placement.
    pub kind: PlacementKind,
    /// New declared bundle size when the bundle grew.
    pub grown_to: Option<u64>,
    /// Entries that must be repointed to `offset`/`length`.
    pub aliases: Vec<Alias>,
}

/// Growth policy: `max(tail + L * factor, tail + minimum)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Multiplier applied to the payload length.
    pub factor: u64,
    /// Smallest growth in bytes.
    pub minimum: u64,
}

impl GrowthPolicy {
    /// Declared size after placing `length` bytes at `tail`.
    pub fn grown_size(&self, tail: u64, length: u64) -> u64 {
        let by_factor = tail.saturating_add(length.saturating_mul(self.factor));
        let by_minimum = tail.saturating_add(self.minimum);
        by_factor.max(by_minimum).max(tail + length)
    }
}

/// Slot table for one stored bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotTable {
    declared: u64,
    slots: Vec<Slot>,
    gaps: Vec<Span>,
    tail: Span,
}

impl SlotTable {
    /// Build from `(offset, length, alias)` triples and the declared size.
    ///
    /// Entries with equal offsets become aliases of one slot spanning the
    /// longest of them. A declared size smaller than the last slot end is
    /// raised to it.
    pub fn build<I>(declared: u64, entries: I) -> Self
    where
        I: IntoIterator<Item = (u64, u64, Alias)>,
    {
        let mut grouped: BTreeMap<u64, Slot> = BTreeMap::new();
        for (offset, length, alias) in entries {
            let slot = grouped.entry(offset).or_insert_with(|| Slot {
                span: Span { offset, length },
                aliases: Vec::new(),
            });
            slot.span.length = slot.span.length.max(length);
            slot.aliases.push(alias);
        }

        let mut gaps = Vec::new();
        let mut cursor = 0u64;
        for slot in grouped.values() {
            if slot.span.offset > cursor {
                gaps.push(Span {
                    offset: cursor,
                    length: slot.span.offset - cursor,
                });
            }
            cursor = cursor.max(slot.span.end());
        }
        let declared = declared.max(cursor);

        let table = Self {
            declared,
            slots: grouped.into_values().collect(),
            gaps,
            tail: Span {
                offset: cursor,
                length: declared - cursor,
            },
        };
        debug!(
            "Slot table: {} slots, {} gaps, tail {} bytes at {}",
            table.slots.len(),
            table.gaps.len(),
            table.tail.length,
            table.tail.offset
        );
        table
    }

    /// Declared bundle size.
    pub const fn declared(&self) -> u64 {
        self.declared
    }

    /// Live slots in offset order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Interior free gaps.
    pub fn gaps(&self) -> &[Span] {
        &self.gaps
    }

    /// Free space after the last live slot.
    pub const fn tail(&self) -> Span {
        self.tail
    }

    /// Total free bytes, tail included.
    pub fn free_bytes(&self) -> u64 {
        self.gaps.iter().map(|g| g.length).sum::<u64>() + self.tail.length
    }

    /// Total bytes held by live slots.
    pub fn live_bytes(&self) -> u64 {
        self.slots.iter().map(|s| s.span.length).sum()
    }

    /// Slot referenced by the index entry at `entry_position`.
    pub fn slot_of(&self, entry_position: usize) -> Option<&Slot> {
        self.slots
            .iter()
            .find(|slot| slot.aliases.iter().any(|a| a.entry_position == entry_position))
    }

    /// Choose a place for `length` bytes replacing the slot of the entry at
    /// `entry_position`, and update the table.
    pub fn allocate(
        &mut self,
        entry_position: usize,
        length: u64,
        growth: GrowthPolicy,
    ) -> Result<Placement> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.aliases.iter().any(|a| a.entry_position == entry_position))
            .ok_or_else(|| {
                StorageError::Allocation(format!("no slot for index entry at {entry_position}"))
            })?;
        let previous = self.slots[index].span;

        let (offset, kind, grown_to) = if length == previous.length {
            (previous.offset, PlacementKind::InPlace, None)
        } else if let Some(g) = self.gaps.iter().position(|gap| gap.length >= length) {
            let offset = self.gaps[g].offset;
            self.take_from_gap(g, length);
            self.release(previous);
            (offset, PlacementKind::Gap, None)
        } else if length < previous.length {
            self.release(Span {
                offset: previous.offset + length,
                length: previous.length - length,
            });
            (previous.offset, PlacementKind::InPlace, None)
        } else if self.tail.length >= length {
            let offset = self.tail.offset;
            self.tail.offset += length;
            self.tail.length -= length;
            self.release(previous);
            (offset, PlacementKind::Tail, None)
        } else {
            let offset = self.tail.offset;
            let grown = growth.grown_size(offset, length);
            self.declared = grown;
            self.tail = Span {
                offset: offset + length,
                length: grown - offset - length,
            };
            self.release(previous);
            (offset, PlacementKind::Grown, Some(grown))
        };

        let slot = &mut self.slots[index];
        slot.span = Span { offset, length };
        let aliases = slot.aliases.clone();
        self.slots.sort_by_key(|s| s.span.offset);

        debug!(
            "Placed {length} bytes at {offset} ({kind:?}), previously {} at {}",
            previous.length, previous.offset
        );
        Ok(Placement {
            offset,
            length,
            previous,
            kind,
            grown_to,
            aliases,
        })
    }

    fn take_from_gap(&mut self, index: usize, length: u64) {
        let gap = &mut self.gaps[index];
        if gap.length == length {
            self.gaps.remove(index);
        } else {
            gap.offset += length;
            gap.length -= length;
        }
    }

    /// Return a span to the free space, merging with neighbours.
    fn release(&mut self, span: Span) {
        if span.length == 0 {
            return;
        }

        let right = self.gaps.iter().position(|g| g.offset == span.end());
        let left = self.gaps.iter().position(|g| g.end() == span.offset);
        let mut merged = span;
        let mut absorbed = Vec::new();
        if let Some(r) = right {
            merged.length += self.gaps[r].length;
            absorbed.push(r);
        }
        if let Some(l) = left {
            merged.offset = self.gaps[l].offset;
            merged.length += self.gaps[l].length;
            absorbed.push(l);
        }
        absorbed.sort_unstable_by(|a, b| b.cmp(a));
        for i in absorbed {
            self.gaps.remove(i);
        }

        if merged.end() == self.tail.offset {
            self.tail.offset = merged.offset;
            self.tail.length += merged.length;
            return;
        }

        let at = self.gaps.partition_point(|g| g.offset < merged.offset);
        self.gaps.insert(at, merged);
    }

    /// Check that live slots do not overlap and that free plus live bytes
    /// equal the declared size.
    pub fn is_consistent(&self) -> bool {
        let accounted = self.free_bytes() + self.live_bytes() == self.declared;
        let occupied: Vec<Span> = self
            .slots
            .iter()
            .map(|s| s.span)
            .filter(|span| span.length > 0)
            .collect();
        let disjoint = occupied.windows(2).all(|w| !w[0].overlaps(&w[1]));
        let tail_last = self
            .slots
            .iter()
            .all(|s| s.span.length == 0 || s.span.end() <= self.tail.offset);
        accounted && disjoint && tail_last && self.tail.end() == self.declared
    }
}
