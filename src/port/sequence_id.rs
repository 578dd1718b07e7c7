/// Per message type sequence counter, wrapping at `u16::MAX`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SequenceIdGenerator {
    current: u16,
}

impl SequenceIdGenerator {
    pub fn new() -> Self {
        SequenceIdGenerator { current: 0 }
    }

    /// Hands out the current value and advances
    pub fn generate(&mut self) -> u16 {
        let id = self.current;
        self.current = self.current.wrapping_add(1);
        id
    }
}
