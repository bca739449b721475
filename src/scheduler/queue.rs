use super::pcb::{Pcb, ProcState};
use super::table::{ProcTable, Slot};

/// The ready queue: an intrusive singly-linked list threaded through each
/// PCB's `ready_next`, ordered by ascending scheduling key. A PCB is in
/// this queue exactly when its state is `Ready`.
pub struct ReadyQueue {
    front: Option<Slot>,
    rear: Option<Slot>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        ReadyQueue {
            front: None,
            rear: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.front.is_none()
    }

    /// Insert by ascending priority; among equal priorities, arrival
    /// order is preserved.
    pub fn enqueue(&mut self, table: &mut ProcTable, slot: Slot) {
        self.insert_by(table, slot, |pcb| pcb.priority);
    }

    /// Earliest-deadline-first order.
    pub fn enqueue_edf(&mut self, table: &mut ProcTable, slot: Slot) {
        self.insert_by(table, slot, |pcb| pcb.deadline);
    }

    /// Shortest-job-first order.
    pub fn enqueue_sjf(&mut self, table: &mut ProcTable, slot: Slot) {
        self.insert_by(table, slot, |pcb| pcb.time_to_run);
    }

    fn insert_by<F: Fn(&Pcb) -> i32>(&mut self, table: &mut ProcTable, slot: Slot, key: F) {
        let new_key = {
            let pcb = table.get_mut(slot).expect("enqueue of a dead slot");
            debug_assert_eq!(
                pcb.state,
                ProcState::Ready,
                "only Ready processes belong in the ready queue"
            );
            pcb.ready_next = None;
            key(pcb)
        };

        let Some(front) = self.front else {
            self.front = Some(slot);
            self.rear = Some(slot);
            return;
        };

        if new_key < key(table.get(front).expect("ready queue front is dead")) {
            table.get_mut(slot).expect("enqueue of a dead slot").ready_next = Some(front);
            self.front = Some(slot);
            return;
        }

        // Walk past every entry whose key is <= the new one, so ties keep
        // their arrival order.
        let mut cur = front;
        loop {
            let next = table.get(cur).expect("ready queue link is dead").ready_next;
            match next {
                Some(n) if key(table.get(n).expect("ready queue link is dead")) <= new_key => {
                    cur = n;
                }
                _ => break,
            }
        }

        let next = table.get(cur).expect("ready queue link is dead").ready_next;
        table.get_mut(slot).expect("enqueue of a dead slot").ready_next = next;
        table.get_mut(cur).expect("ready queue link is dead").ready_next = Some(slot);
        if next.is_none() {
            self.rear = Some(slot);
        }
    }

    /// Remove and return the head. The popped PCB's `ready_next` is
    /// cleared; that link is only meaningful while enqueued.
    pub fn dequeue(&mut self, table: &mut ProcTable) -> Option<Slot> {
        let front = self.front?;
        let pcb = table.get_mut(front).expect("ready queue front is dead");
        self.front = pcb.ready_next.take();
        if self.front.is_none() {
            self.rear = None;
        }
        Some(front)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::pcb::test_pcb;

    fn setup(priorities: &[i32]) -> (ProcTable, ReadyQueue, Vec<Slot>) {
        let mut table = ProcTable::new();
        let mut queue = ReadyQueue::new();
        let mut slots = Vec::new();
        for (i, &priority) in priorities.iter().enumerate() {
            let slot = table.insert(test_pcb(i as u32 + 1, priority)).unwrap();
            queue.enqueue(&mut table, slot);
            slots.push(slot);
        }
        (table, queue, slots)
    }

    fn drain(table: &mut ProcTable, queue: &mut ReadyQueue) -> Vec<u32> {
        let mut pids = Vec::new();
        while let Some(slot) = queue.dequeue(table) {
            pids.push(table.get(slot).unwrap().pid.0);
        }
        pids
    }

    #[test]
    fn dequeues_in_ascending_priority() {
        let (mut table, mut queue, _) = setup(&[3, 1, 2]);
        assert_eq!(drain(&mut table, &mut queue), [2, 3, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn equal_priorities_keep_arrival_order() {
        let (mut table, mut queue, _) = setup(&[1, 1, 0, 1]);
        // pid 3 has the lowest priority value; pids 1, 2, 4 tie and must
        // come out in the order they went in.
        assert_eq!(drain(&mut table, &mut queue), [3, 1, 2, 4]);
    }

    #[test]
    fn removing_the_only_element_resets_both_ends() {
        let (mut table, mut queue, slots) = setup(&[5]);
        assert_eq!(queue.dequeue(&mut table), Some(slots[0]));
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(&mut table), None);

        // The queue must be fully reusable afterwards.
        queue.enqueue(&mut table, slots[0]);
        assert_eq!(queue.dequeue(&mut table), Some(slots[0]));
        assert!(queue.is_empty());
    }

    #[test]
    fn popped_links_are_cleared() {
        let (mut table, mut queue, slots) = setup(&[1, 2]);
        let first = queue.dequeue(&mut table).unwrap();
        assert_eq!(first, slots[0]);
        assert_eq!(table.get(first).unwrap().ready_next, None);
    }

    #[test]
    fn edf_orders_by_deadline() {
        let mut table = ProcTable::new();
        let mut queue = ReadyQueue::new();
        for (pid, deadline) in [(1, 30), (2, 10), (3, 20)] {
            let mut pcb = test_pcb(pid, 0);
            pcb.deadline = deadline;
            let slot = table.insert(pcb).unwrap();
            queue.enqueue_edf(&mut table, slot);
        }
        assert_eq!(drain(&mut table, &mut queue), [2, 3, 1]);
    }

    #[test]
    fn sjf_orders_by_expected_run_length() {
        let mut table = ProcTable::new();
        let mut queue = ReadyQueue::new();
        for (pid, time_to_run) in [(1, 9), (2, 2), (3, 2), (4, 1)] {
            let mut pcb = test_pcb(pid, 0);
            pcb.time_to_run = time_to_run;
            let slot = table.insert(pcb).unwrap();
            queue.enqueue_sjf(&mut table, slot);
        }
        // Ties (pids 2 and 3) stay in arrival order.
        assert_eq!(drain(&mut table, &mut queue), [4, 2, 3, 1]);
    }
}
