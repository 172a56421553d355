// slot arena holding the linked chain.
//
// the chain is a doubly linked list bounded by two anchor slots which never hold a user value.
// links are slot indices rather than pointers. detaching a node unlinks it from its neighbors but
// leaves the node's own links untouched: a traversal whose cursor sits on a detached slot can
// still walk forward along the abandoned `next` chain to the next surviving position.
//
// detached slots are therefore not recycled while any traversal cursor is registered. they sit in
// a graveyard until the cursor count drops to zero, at which point they move to the free list.

// anchor slots, allocated at construction and live forever.
pub(crate) const LEFT: usize = 0;
pub(crate) const RIGHT: usize = 1;

// link value for "no neighbor". only anchors' outer links hold this.
const NIL: usize = usize::MAX;

pub(crate) struct Slot<T> {
    // None for anchors and tombstones.
    pub(crate) value: Option<T>,
    pub(crate) prev: usize,
    pub(crate) next: usize,
    // false once detached. a dead slot's links are frozen.
    pub(crate) live: bool,
}

pub(crate) struct State<T> {
    pub(crate) slots: Vec<Slot<T>>,
    // recyclable slot indices.
    free: Vec<usize>,
    // detached slots that may still be referenced by a registered cursor.
    graveyard: Vec<usize>,
    // number of registered traversal cursors.
    cursors: usize,
    // number of live user nodes (anchors excluded).
    len: usize,
}

impl<T> State<T> {
    pub(crate) fn new() -> Self {
        State {
            slots: vec![
                Slot { value: None, prev: NIL, next: RIGHT, live: true },
                Slot { value: None, prev: LEFT, next: NIL, live: true },
            ],
            free: Vec::new(),
            graveyard: Vec::new(),
            cursors: 0,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn alloc(&mut self, value: T) -> usize {
        let slot = Slot { value: Some(value), prev: NIL, next: NIL, live: true };
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = slot;
            idx
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        }
    }

    // splice a new node between `at` and its predecessor. `at` must be live and must not be the
    // left anchor.
    pub(crate) fn attach_before(&mut self, at: usize, value: T) {
        debug_assert!(at != LEFT && self.slots[at].live);
        let idx = self.alloc(value);
        let prev = self.slots[at].prev;
        self.slots[idx].prev = prev;
        self.slots[idx].next = at;
        self.slots[prev].next = idx;
        self.slots[at].prev = idx;
        self.len += 1;
    }

    pub(crate) fn attach_back(&mut self, value: T) {
        self.attach_before(RIGHT, value);
    }

    pub(crate) fn attach_front(&mut self, value: T) {
        let first = self.slots[LEFT].next;
        self.attach_before(first, value);
    }

    // unsplice a live user node, returning its value. the slot becomes a tombstone whose links
    // still describe where it used to sit.
    pub(crate) fn detach(&mut self, idx: usize) -> T {
        debug_assert!(idx != LEFT && idx != RIGHT && self.slots[idx].live);
        let prev = self.slots[idx].prev;
        let next = self.slots[idx].next;
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.slots[idx].live = false;
        let value = self.slots[idx].value.take().expect("live node without value");
        self.len -= 1;
        if self.cursors == 0 {
            self.free.push(idx);
        } else {
            self.graveyard.push(idx);
        }
        value
    }

    // starting from `idx`, follow `next` links forward until a live slot is reached. terminates
    // because every abandoned chain leads to the right anchor, which is live.
    pub(crate) fn recover(&self, mut idx: usize) -> usize {
        while !self.slots[idx].live {
            idx = self.slots[idx].next;
        }
        idx
    }

    pub(crate) fn register_cursor(&mut self) {
        self.cursors += 1;
    }

    pub(crate) fn release_cursor(&mut self) {
        self.cursors -= 1;
        if self.cursors == 0 {
            self.free.append(&mut self.graveyard);
        }
    }

    pub(crate) fn pop_back_idx(&self) -> Option<usize> {
        let last = self.slots[RIGHT].prev;
        (last != LEFT).then_some(last)
    }

    pub(crate) fn pop_front_idx(&self) -> Option<usize> {
        let first = self.slots[LEFT].next;
        (first != RIGHT).then_some(first)
    }

    // first node whose value equals `value`, in chain order.
    pub(crate) fn find_equal(&self, value: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        let mut idx = self.slots[LEFT].next;
        while idx != RIGHT {
            if self.slots[idx].value.as_ref() == Some(value) {
                return Some(idx);
            }
            idx = self.slots[idx].next;
        }
        None
    }
}
