/// Fixed-capacity circular store of mono 16-bit samples.
///
/// Writes wrap around and silently evict the oldest samples once the buffer
/// is full. Reads are non-destructive: they copy the most recent window and
/// zero-fill whatever has never been written. Nothing here allocates after
/// construction, so every method is safe to call from the audio callback.
pub struct SampleRingBuffer {
    data: Box<[i16]>,
    /// `capacity - 1`; capacity is always a power of two.
    mask: usize,
    /// Index of the next sample to be written.
    write_pos: usize,
    /// Number of valid samples, saturating at capacity.
    filled: usize,
}

impl SampleRingBuffer {
    /// Create a zeroed buffer. `capacity` is rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            data: vec![0i16; capacity].into_boxed_slice(),
            mask: capacity - 1,
            write_pos: 0,
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid samples currently held.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Append samples at the write cursor, evicting the oldest on overrun.
    pub fn write(&mut self, samples: &[i16]) {
        let capacity = self.capacity();
        // Only the newest `capacity` samples can survive the write.
        let samples = if samples.len() > capacity {
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        let first = samples.len().min(capacity - self.write_pos);
        self.data[self.write_pos..self.write_pos + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.data[..rest].copy_from_slice(&samples[first..]);

        self.write_pos = (self.write_pos + samples.len()) & self.mask;
        self.filled = (self.filled + samples.len()).min(capacity);
    }

    /// Copy the most recent `n` samples in chronological order.
    ///
    /// Allocating convenience form of [`read_latest_into`](Self::read_latest_into).
    pub fn read_latest(&self, n: usize) -> Vec<i16> {
        let mut out = vec![0i16; n];
        self.read_latest_into(&mut out);
        out
    }

    /// Fill `out` with the most recent `out.len()` samples.
    ///
    /// If fewer samples are available the leading part of `out` is silence.
    pub fn read_latest_into(&self, out: &mut [i16]) {
        let take = out.len().min(self.filled);
        let silent = out.len() - take;
        out[..silent].fill(0);
        self.for_each_latest(take, |i, sample| out[silent + i] = sample);
    }

    /// Add the most recent `acc.len()` samples into `acc`, right-aligned.
    ///
    /// Positions with no history receive nothing, which is the same as adding
    /// silence.
    pub fn accumulate_latest(&self, acc: &mut [i32]) {
        let take = acc.len().min(self.filled);
        let offset = acc.len() - take;
        self.for_each_latest(take, |i, sample| acc[offset + i] += i32::from(sample));
    }

    /// Zero the contents and reset the cursor.
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.write_pos = 0;
        self.filled = 0;
    }

    /// Visit the newest `take` samples oldest-first. `take` must not exceed `filled`.
    fn for_each_latest(&self, take: usize, mut f: impl FnMut(usize, i16)) {
        let start = self.write_pos.wrapping_sub(take) & self.mask;
        for i in 0..take {
            f(i, self.data[(start + i) & self.mask]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(SampleRingBuffer::new(3000).capacity(), 4096);
        assert_eq!(SampleRingBuffer::new(4096).capacity(), 4096);
        assert_eq!(SampleRingBuffer::new(0).capacity(), 1);
    }

    #[test]
    fn test_read_latest_returns_recent_window() {
        let mut rb = SampleRingBuffer::new(8);
        rb.write(&[1, 2, 3, 4, 5]);
        assert_eq!(rb.read_latest(3), vec![3, 4, 5]);
        assert_eq!(rb.len(), 5);
    }

    #[test]
    fn test_underrun_zero_fills_prefix() {
        let mut rb = SampleRingBuffer::new(8);
        rb.write(&[7, 8]);
        assert_eq!(rb.read_latest(5), vec![0, 0, 0, 7, 8]);
    }

    #[test]
    fn test_fresh_buffer_reads_silence() {
        let rb = SampleRingBuffer::new(16);
        assert!(rb.is_empty());
        assert_eq!(rb.read_latest(4), vec![0; 4]);
    }

    #[test]
    fn test_overrun_evicts_oldest() {
        let mut rb = SampleRingBuffer::new(4);
        rb.write(&[1, 2, 3]);
        rb.write(&[4, 5, 6]);
        assert_eq!(rb.len(), 4);
        assert_eq!(rb.read_latest(4), vec![3, 4, 5, 6]);
        // Asking for more than capacity: the excess is silence.
        assert_eq!(rb.read_latest(6), vec![0, 0, 3, 4, 5, 6]);
    }

    #[test]
    fn test_write_larger_than_capacity_keeps_tail() {
        let mut rb = SampleRingBuffer::new(4);
        rb.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(rb.read_latest(4), vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_read_is_non_destructive() {
        let mut rb = SampleRingBuffer::new(8);
        rb.write(&[10, 20]);
        assert_eq!(rb.read_latest(2), vec![10, 20]);
        assert_eq!(rb.read_latest(2), vec![10, 20]);
    }

    #[test]
    fn test_accumulate_latest_right_aligns() {
        let mut rb = SampleRingBuffer::new(8);
        rb.write(&[i16::MAX, i16::MAX]);
        let mut acc = [1i32; 4];
        rb.accumulate_latest(&mut acc);
        assert_eq!(acc, [1, 1, 32768, 32768]);
    }

    #[test]
    fn test_clear_resets_contents() {
        let mut rb = SampleRingBuffer::new(4);
        rb.write(&[1, 2, 3]);
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.read_latest(3), vec![0, 0, 0]);
        rb.write(&[9]);
        assert_eq!(rb.read_latest(2), vec![0, 9]);
    }
}
