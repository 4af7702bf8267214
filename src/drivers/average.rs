/// Moving average over the last `len` samples, `len <= CAP`.
///
/// Until the window has filled once the mean of the samples seen so far is
/// returned, so the first readings after boot are not biased towards zero.
pub struct RollingAverage<const CAP: usize> {
    window: [u32; CAP],
    len: usize,
    index: usize,
    count: usize,
    sum: u64,
}

impl<const CAP: usize> RollingAverage<CAP> {
    pub fn new(len: usize) -> Self {
        Self {
            window: [0; CAP],
            len: len.clamp(1, CAP),
            index: 0,
            count: 0,
            sum: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_warm(&self) -> bool {
        self.count == self.len
    }

    pub fn push(&mut self, sample: u32) -> f32 {
        if self.count == self.len {
            self.sum -= self.window[self.index] as u64;
        } else {
            self.count += 1;
        }
        self.window[self.index] = sample;
        self.sum += sample as u64;
        self.index = (self.index + 1) % self.len;

        self.sum as f32 / self.count as f32
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.count = 0;
        self.sum = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_window_averages_what_it_has() {
        let mut av = RollingAverage::<8>::new(4);
        assert_eq!(av.push(10), 10.0);
        assert_eq!(av.push(20), 15.0);
        assert!(!av.is_warm());
        assert_eq!(av.push(30), 20.0);
        assert_eq!(av.push(40), 25.0);
        assert!(av.is_warm());
    }

    #[test]
    fn full_window_drops_oldest() {
        let mut av = RollingAverage::<8>::new(2);
        av.push(100);
        av.push(200);
        assert_eq!(av.push(300), 250.0);
        assert_eq!(av.push(300), 300.0);
    }

    #[test]
    fn len_is_clamped_to_capacity() {
        assert_eq!(RollingAverage::<4>::new(32).len(), 4);
        assert_eq!(RollingAverage::<4>::new(0).len(), 1);
    }
}
