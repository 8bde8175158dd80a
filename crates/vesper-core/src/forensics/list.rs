//! Bounded traversal of in-memory doubly linked lists (`LIST_ENTRY`).

use std::collections::HashSet;

use tracing::{debug, warn};

use super::AddressSpace;
use crate::types::{Address, MemoryModel};

/// Which link of a `LIST_ENTRY` to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListDirection
{
    /// Follow `Flink` (offset 0)
    #[default]
    Forward,
    /// Follow `Blink` (one pointer past `Flink`)
    Backward,
}

/// Walks a circular `LIST_ENTRY` chain starting at a list head
///
/// Each yielded item is the address of the containing record, i.e. the link
/// address minus `entry_offset`. The walk ends when it comes back to any link
/// it has already visited (including the head), when a link is null or
/// unreadable, or after `max_entries` records. Target memory is untrusted, so
/// the walker never loops forever on a corrupted chain.
///
/// The iterator is lazy and not restartable.
///
/// ## Example
///
/// ```rust,no_run
/// use vesper_core::forensics::{AddressSpace, ListDirection, ListWalker};
/// use vesper_core::types::{Address, MemoryModel};
///
/// # fn walk(space: &dyn AddressSpace) {
/// // ActiveProcessLinks lives at +0x88 in the process object
/// let walker = ListWalker::new(space, Address::new(0x8055_a158), 0x88, MemoryModel::Bits32)
///     .direction(ListDirection::Forward)
///     .max_entries(512);
/// for record in walker {
///     println!("{record}");
/// }
/// # }
/// ```
pub struct ListWalker<'a>
{
    space: &'a dyn AddressSpace,
    current: Address,
    entry_offset: u64,
    model: MemoryModel,
    direction: ListDirection,
    seen: HashSet<Address>,
    remaining: usize,
    done: bool,
}

impl<'a> ListWalker<'a>
{
    /// Default cap on the number of records a walk may yield.
    pub const DEFAULT_MAX_ENTRIES: usize = 4096;

    /// Start a forward walk at `head`.
    #[must_use]
    pub fn new(space: &'a dyn AddressSpace, head: Address, entry_offset: u64, model: MemoryModel) -> Self
    {
        let mut seen = HashSet::new();
        seen.insert(head);
        Self {
            space,
            current: head,
            entry_offset,
            model,
            direction: ListDirection::Forward,
            seen,
            remaining: Self::DEFAULT_MAX_ENTRIES,
            done: false,
        }
    }

    /// Follow `Flink` or `Blink`.
    #[must_use]
    pub fn direction(mut self, direction: ListDirection) -> Self
    {
        self.direction = direction;
        self
    }

    /// Cap the number of records yielded.
    #[must_use]
    pub fn max_entries(mut self, max_entries: usize) -> Self
    {
        self.remaining = max_entries;
        self
    }

    fn next_link(&self) -> Option<Address>
    {
        let field = match self.direction {
            ListDirection::Forward => self.current,
            ListDirection::Backward => self.current + self.model.pointer_size() as u64,
        };
        match self.space.read_pointer(field, self.model) {
            Ok(link) if link.is_null() => {
                debug!(at = %field, "null list link");
                None
            }
            Ok(link) => Some(link),
            Err(err) => {
                warn!(at = %field, error = %err, "unreadable list link, stopping walk");
                None
            }
        }
    }
}

impl Iterator for ListWalker<'_>
{
    type Item = Address;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done {
            return None;
        }
        let Some(link) = self.next_link() else {
            self.done = true;
            return None;
        };
        if !self.seen.insert(link) {
            self.done = true;
            return None;
        }
        if self.remaining == 0 {
            warn!(at = %link, "list walk hit the entry cap, stopping");
            self.done = true;
            return None;
        }
        self.remaining -= 1;
        self.current = link;
        Some(link - self.entry_offset)
    }
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;
    use crate::error::{DebuggerError, Result};

    struct Links(HashMap<u64, u32>);

    impl AddressSpace for Links
    {
        fn read(&self, address: Address, len: usize) -> Result<Vec<u8>>
        {
            let value = self
                .0
                .get(&address.value())
                .ok_or(DebuggerError::MemoryRead { address, len })?;
            Ok(value.to_le_bytes()[..len.min(4)].to_vec())
        }

        fn memory_model(&self) -> Option<MemoryModel>
        {
            Some(MemoryModel::Bits32)
        }
    }

    fn ring() -> Links
    {
        // head(0x100) -> 0x210 -> 0x310 -> head, blinks the other way
        Links(HashMap::from([
            (0x100, 0x210),
            (0x104, 0x310),
            (0x210, 0x310),
            (0x214, 0x100),
            (0x310, 0x100),
            (0x314, 0x210),
        ]))
    }

    #[test]
    fn test_walk_stops_at_head()
    {
        let links = ring();
        let records: Vec<_> = ListWalker::new(&links, Address::new(0x100), 0x10, MemoryModel::Bits32).collect();
        assert_eq!(records, vec![Address::new(0x200), Address::new(0x300)]);
    }

    #[test]
    fn test_walk_backward()
    {
        let links = ring();
        let records: Vec<_> = ListWalker::new(&links, Address::new(0x100), 0x10, MemoryModel::Bits32)
            .direction(ListDirection::Backward)
            .collect();
        assert_eq!(records, vec![Address::new(0x300), Address::new(0x200)]);
    }

    #[test]
    fn test_walk_stops_on_inner_cycle()
    {
        // 0x310 points back at 0x210 instead of the head
        let mut links = ring();
        links.0.insert(0x310, 0x210);
        let records: Vec<_> = ListWalker::new(&links, Address::new(0x100), 0, MemoryModel::Bits32).collect();
        assert_eq!(records, vec![Address::new(0x210), Address::new(0x310)]);
    }

    #[test]
    fn test_walk_stops_on_unreadable_link()
    {
        let links = Links(HashMap::from([(0x100, 0x210)]));
        let records: Vec<_> = ListWalker::new(&links, Address::new(0x100), 0, MemoryModel::Bits32).collect();
        assert_eq!(records, vec![Address::new(0x210)]);
    }

    #[test]
    fn test_walk_respects_cap()
    {
        let links = ring();
        let records: Vec<_> = ListWalker::new(&links, Address::new(0x100), 0, MemoryModel::Bits32)
            .max_entries(1)
            .collect();
        assert_eq!(records.len(), 1);
    }
}
