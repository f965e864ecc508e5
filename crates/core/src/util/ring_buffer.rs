/// Fixed-capacity FIFO: once full, every push evicts the oldest element.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    buf: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self {
            buf,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn push(&mut self, value: T) -> Option<T> {
        let cap = self.capacity();
        let idx = (self.head + self.len) % cap;

        if self.len < cap {
            self.buf[idx] = Some(value);
            self.len += 1;
            None
        } else {
            let evicted = self.buf[self.head].take();
            self.buf[self.head] = Some(value);
            self.head = (self.head + 1) % cap;
            evicted
        }
    }

    /// Replaces the contents with `capacity` copies of `value`.
    pub fn fill(&mut self, value: T)
    where
        T: Clone,
    {
        for slot in &mut self.buf {
            *slot = Some(value.clone());
        }
        self.head = 0;
        self.len = self.capacity();
    }

    pub fn get(&self, index_from_oldest: usize) -> Option<&T> {
        if index_from_oldest >= self.len {
            return None;
        }
        let idx = (self.head + index_from_oldest) % self.capacity();
        self.buf[idx].as_ref()
    }

    pub fn newest(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}
