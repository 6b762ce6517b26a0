//! Synthetic label names
//!
//! Labels are drawn from a bijective base-26 counter: `A`..`Z`, `AA`..`ZZ`,
//! `AAA`... Every optimization run starts its own generator, so the names
//! are unique within one lowered program and reproducible across runs.

#[derive(Debug, Default)]
pub struct LabelGenerator {
    counter: u64,
}

impl LabelGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next unused label
    pub fn next_label(&mut self) -> String {
        let mut n = self.counter + 1;
        self.counter += 1;

        let mut digits = Vec::new();
        while n > 0 {
            n -= 1;
            digits.push((b'A' + (n % 26) as u8) as char);
            n /= 26;
        }
        digits.iter().rev().collect()
    }

    /// Number of labels handed out so far
    pub fn issued(&self) -> u64 {
        self.counter
    }
}
