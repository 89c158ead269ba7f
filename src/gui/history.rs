use std::collections::VecDeque;

/// Fixed-capacity history of timestamped readback samples. Appending past
/// capacity drops the oldest sample.
pub struct ScrollingBuffer {
    max_length: usize,
    samples: VecDeque<(f32, f32)>,
}

impl ScrollingBuffer {
    pub fn new(max_length: usize) -> ScrollingBuffer {
        ScrollingBuffer {
            max_length,
            samples: VecDeque::with_capacity(max_length),
        }
    }

    pub fn append(&mut self, timestamp: f32, value: f32) {
        if self.samples.len() == self.max_length {
            self.samples.pop_front();
        }
        self.samples.push_back((timestamp, value));
    }

    pub fn last_value(&self) -> Option<f32> {
        self.samples.back().map(|(_, value)| *value)
    }

    pub fn last_timestamp(&self) -> Option<f32> {
        self.samples.back().map(|(timestamp, _)| *timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.samples.iter().copied()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_newest_samples_at_capacity() {
        let mut buffer = ScrollingBuffer::new(3);
        for i in 0..5 {
            buffer.append(i as f32, (i * 10) as f32);
        }

        let samples: Vec<(f32, f32)> = buffer.iter().collect();
        assert_eq!(samples, vec![(2.0, 20.0), (3.0, 30.0), (4.0, 40.0)]);
        assert_eq!(buffer.last_value(), Some(40.0));
        assert_eq!(buffer.last_timestamp(), Some(4.0));
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut buffer = ScrollingBuffer::new(4);
        buffer.append(0.0, 1.0);
        assert!(!buffer.is_empty());

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.last_value(), None);
    }
}
