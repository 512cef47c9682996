//! 空闲资源环形队列

/// 先进先出的环形缓冲区，写满时扩容到 `2n+1`
#[derive(Debug)]
pub struct Ring<T> {
    data: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> Ring<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut data = Vec::with_capacity(capacity);
        data.resize_with(capacity, || None);
        Self {
            data,
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn push_back(&mut self, value: T) {
        if self.len >= self.data.len() {
            self.grow(2 * self.len + 1);
        }
        let slot = (self.head + self.len) % self.data.len();
        self.data[slot] = Some(value);
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.data[self.head].take();
        self.head = (self.head + 1) % self.data.len();
        self.len -= 1;
        value
    }

    /// 取出全部元素（按入队顺序）
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(value) = self.pop_front() {
            out.push(value);
        }
        out
    }

    fn grow(&mut self, new_size: usize) {
        let mut data: Vec<Option<T>> = Vec::with_capacity(new_size);
        for i in 0..self.len {
            let slot = (self.head + i) % self.data.len();
            data.push(self.data[slot].take());
        }
        data.resize_with(new_size, || None);
        self.data = data;
        self.head = 0;
    }
}
