use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    ReliableOrdered,
    ReliableUnordered,
    UnreliableOrdered,
    UnreliableUnordered,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::ReliableOrdered,
        Channel::ReliableUnordered,
        Channel::UnreliableOrdered,
        Channel::UnreliableUnordered,
    ];

    #[inline]
    pub fn is_reliable(self) -> bool {
        matches!(self, Channel::ReliableOrdered | Channel::ReliableUnordered)
    }

    #[inline]
    pub fn is_ordered(self) -> bool {
        matches!(self, Channel::ReliableOrdered | Channel::UnreliableOrdered)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::ReliableOrdered => "reliable-ordered",
            Channel::ReliableUnordered => "reliable-unordered",
            Channel::UnreliableOrdered => "unreliable-ordered",
            Channel::UnreliableUnordered => "unreliable-unordered",
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Channel::ReliableOrdered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_semantics() {
        let reliable: Vec<_> = Channel::ALL.iter().filter(|c| c.is_reliable()).collect();
        let ordered: Vec<_> = Channel::ALL.iter().filter(|c| c.is_ordered()).collect();
        assert_eq!(reliable.len(), 2);
        assert_eq!(ordered.len(), 2);
        assert!(Channel::ReliableOrdered.is_reliable() && Channel::ReliableOrdered.is_ordered());
        assert!(!Channel::UnreliableUnordered.is_reliable());
        assert!(!Channel::UnreliableUnordered.is_ordered());
    }
}
