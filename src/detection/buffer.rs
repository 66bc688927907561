// src/detection/buffer.rs
use ndarray::Array2;

/// Fixed-capacity circular store holding the most recent samples of every channel.
///
/// Storage is a `channels x capacity` arena. Reads are addressed by physical
/// position: any `isize` is accepted and wrapped with `rem_euclid`, so
/// `write_position() - 1` is the newest sample and `write_position()` is the
/// oldest once the buffer has wrapped. Negative offsets wrap from the end.
#[derive(Clone, Debug)]
pub struct RingBuffer {
    data: Array2<f64>, // channel -> slot
    position: usize,
    written: u64,
}

impl RingBuffer {
    /// Panics if `capacity` is zero; callers size buffers from a validated plan.
    pub fn new(channels: usize, capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            data: Array2::zeros((channels, capacity)),
            position: 0,
            written: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.ncols()
    }

    /// Slot the next frame will be written to.
    pub fn write_position(&self) -> usize {
        self.position
    }

    /// Number of valid samples per channel (saturates at capacity).
    pub fn len(&self) -> usize {
        self.written.min(self.capacity() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Writes one sample per channel. Extra values are ignored, missing channels keep their old slot.
    pub fn push(&mut self, frame: &[f64]) {
        let mut column = self.data.column_mut(self.position);
        for (slot, &sample) in column.iter_mut().zip(frame) {
            *slot = sample;
        }
        self.position += 1;
        if self.position == self.capacity() {
            self.position = 0;
        }
        self.written += 1;
    }

    pub fn read(&self, channel: usize, position: isize) -> f64 {
        let slot = position.rem_euclid(self.capacity() as isize) as usize;
        self.data[[channel, slot]]
    }

    /// Copies `len` samples of `channel` ending `age` frames before the newest one, oldest first.
    pub fn copy_recent(&self, channel: usize, age: usize, len: usize) -> Vec<f64> {
        let end = self.position as isize - 1 - age as isize;
        let start = end - (len as isize - 1);
        (0..len as isize).map(|i| self.read(channel, start + i)).collect()
    }

    pub fn reset(&mut self) {
        self.data.fill(0.0);
        self.position = 0;
        self.written = 0;
    }
}
