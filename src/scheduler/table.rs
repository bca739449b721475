use super::pcb::{Pcb, Pid, ProcState};
use alloc::vec::Vec;

/// Stable handle to a PCB.
///
/// Handles carry the slot's generation, so a handle kept across a reap
/// resolves to `None` instead of aliasing whatever process reuses the
/// slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    index: u32,
    generation: u32,
}

struct Entry {
    generation: u32,
    pcb: Option<Pcb>,
}

/// Every PCB in the system, plus the all-process list threaded through
/// `table_next`. A PCB leaves the table only when its parent reaps it;
/// dropping the returned `Pcb` is what releases its stacks.
pub struct ProcTable {
    entries: Vec<Entry>,
    free: Vec<u32>,
    head: Option<Slot>,
}

impl ProcTable {
    pub const fn new() -> Self {
        ProcTable {
            entries: Vec::new(),
            free: Vec::new(),
            head: None,
        }
    }

    /// Store `pcb` and thread it onto the front of the all-process list.
    /// Returns `None` when slot storage cannot grow.
    pub fn insert(&mut self, mut pcb: Pcb) -> Option<Slot> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.try_reserve(1).ok()?;
                self.free.try_reserve(1).ok()?;
                self.entries.push(Entry {
                    generation: 0,
                    pcb: None,
                });
                (self.entries.len() - 1) as u32
            }
        };
        let generation = self.entries[index as usize].generation;
        let slot = Slot { index, generation };
        pcb.table_next = self.head;
        self.entries[index as usize].pcb = Some(pcb);
        self.head = Some(slot);
        Some(slot)
    }

    pub fn get(&self, slot: Slot) -> Option<&Pcb> {
        let entry = self.entries.get(slot.index as usize)?;
        if entry.generation != slot.generation {
            return None;
        }
        entry.pcb.as_ref()
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut Pcb> {
        let entry = self.entries.get_mut(slot.index as usize)?;
        if entry.generation != slot.generation {
            return None;
        }
        entry.pcb.as_mut()
    }

    /// Unlink `slot` from the all-process list and take ownership of its
    /// PCB. The slot's generation advances, invalidating every
    /// outstanding handle to it.
    pub fn remove(&mut self, slot: Slot) -> Option<Pcb> {
        self.get(slot)?;
        self.unlink(slot);
        let entry = &mut self.entries[slot.index as usize];
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(slot.index);
        entry.pcb.take()
    }

    fn unlink(&mut self, slot: Slot) {
        let target_next = self.get(slot).and_then(|pcb| pcb.table_next);
        if self.head == Some(slot) {
            self.head = target_next;
            return;
        }
        let mut cursor = self.head;
        while let Some(cur) = cursor {
            let next = self.get(cur).and_then(|pcb| pcb.table_next);
            if next == Some(slot) {
                if let Some(pcb) = self.get_mut(cur) {
                    pcb.table_next = target_next;
                }
                return;
            }
            cursor = next;
        }
    }

    /// Reap search: the first `Zombie` in table order whose parent link
    /// points at `parent`.
    pub fn remove_zombie_child(&mut self, parent: Slot) -> Option<Pcb> {
        let found = self
            .iter()
            .find(|(_, pcb)| pcb.parent == Some(parent) && pcb.state == ProcState::Zombie)
            .map(|(slot, _)| slot)?;
        self.remove(found)
    }

    /// Walk the all-process list, most recently created first.
    pub fn iter(&self) -> TableIter<'_> {
        TableIter {
            table: self,
            cursor: self.head,
        }
    }

    pub fn contains_pid(&self, pid: Pid) -> bool {
        self.iter().any(|(_, pcb)| pcb.pid == pid)
    }
}

pub struct TableIter<'a> {
    table: &'a ProcTable,
    cursor: Option<Slot>,
}

impl<'a> Iterator for TableIter<'a> {
    type Item = (Slot, &'a Pcb);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let pcb = self.table.get(slot)?;
        self.cursor = pcb.table_next;
        Some((slot, pcb))
    }
}
