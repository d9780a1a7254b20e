/// Handle to a node of a [`List`]. Stays valid until the node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(usize);

struct Node<T> {
    value: T,
    prev: Option<Slot>,
    next: Option<Slot>,
}

/// A doubly linked list stored in a slab, linked by index instead of by pointer.
///
/// The front is the most recently used end, the back the least recently used one. Insertion,
/// unlinking and moving a node to the front are all O(1). Freed slots are recycled.
pub struct List<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<Slot>,
    tail: Option<Slot>,
    len: usize,
}

impl<T> List<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push_front(&mut self, value: T) -> Slot {
        let node = Node {
            value,
            prev: None,
            next: self.head,
        };

        let slot = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                Slot(index)
            }
            None => {
                self.nodes.push(Some(node));
                Slot(self.nodes.len() - 1)
            }
        };

        match self.head {
            Some(head) => self.node_mut(head).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
        self.len += 1;

        slot
    }

    /// Unlinks the node and hands its value back. Returns `None` for a vacant slot.
    pub fn remove(&mut self, slot: Slot) -> Option<T> {
        let node = self.nodes.get_mut(slot.0)?.take()?;
        self.link(node.prev, node.next);
        self.free.push(slot.0);
        self.len -= 1;

        Some(node.value)
    }

    pub fn move_to_front(&mut self, slot: Slot) {
        if self.head == Some(slot) {
            return;
        }
        let Some(node) = self.nodes.get(slot.0).and_then(Option::as_ref) else {
            return;
        };
        let (prev, next) = (node.prev, node.next);

        self.link(prev, next);

        let old_head = self.head;
        if let Some(head) = old_head {
            self.node_mut(head).prev = Some(slot);
        }
        let node = self.node_mut(slot);
        node.prev = None;
        node.next = old_head;
        self.head = Some(slot);
    }

    /// The least recently used node.
    pub fn back(&self) -> Option<Slot> {
        self.tail
    }

    pub fn get(&self, slot: Slot) -> Option<&T> {
        self.nodes.get(slot.0)?.as_ref().map(|node| &node.value)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        self.nodes
            .get_mut(slot.0)?
            .as_mut()
            .map(|node| &mut node.value)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Values from the most to the least recently used.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.nodes.get(cursor?.0)?.as_ref()?;
            cursor = node.next;
            Some(&node.value)
        })
    }

    /// Joins `prev` and `next` around a node that is being unlinked.
    fn link(&mut self, prev: Option<Slot>, next: Option<Slot>) {
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }

    // Links always point at occupied slots.
    fn node_mut(&mut self, slot: Slot) -> &mut Node<T> {
        match self.nodes[slot.0].as_mut() {
            Some(node) => node,
            None => unreachable!("list link points at a vacant slot"),
        }
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}
