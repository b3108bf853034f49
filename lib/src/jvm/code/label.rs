use std::fmt;

/// Opaque label
///
/// Labels are handed out by the [`CodeBuilder`](super::CodeBuilder) of a method and only make
/// sense within that method.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SynLabel(usize);

impl SynLabel {
    /// Label for the first block in the method
    pub const START: SynLabel = SynLabel(0);

    /// Get the next fresh label
    pub fn next(&self) -> SynLabel {
        SynLabel(self.0 + 1)
    }
}

/// Generates new labels
///
/// Cloning does not split the generator source - the cloned generator will produce the same
/// sequence of labels as the original.
#[derive(Clone, Debug)]
pub struct SynLabelGenerator(SynLabel);

impl SynLabelGenerator {
    pub fn new(start: SynLabel) -> SynLabelGenerator {
        SynLabelGenerator(start)
    }

    /// Generate a fresh label
    pub fn fresh_label(&mut self) -> SynLabel {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

impl fmt::Debug for SynLabel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_labels() {
        let mut generator = SynLabelGenerator::new(SynLabel::START);
        let l0 = generator.fresh_label();
        let mut copy = generator.clone();
        let l1 = generator.fresh_label();
        assert_eq!(l0, SynLabel::START);
        assert_ne!(l0, l1);
        assert_eq!(copy.fresh_label(), l1);
        assert_eq!(format!("{:?}", l1), "l1");
    }
}
