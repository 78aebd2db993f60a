use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign};

/// A number of bytes, split into bytes on the managed heap and bytes of
/// native memory registered against an object.
///
/// The two components are summed independently. Sizes order by their total.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub struct Size {
    java: u64,
    registered_native: u64,
}

impl Size {
    pub const ZERO: Size = Size {
        java: 0,
        registered_native: 0,
    };

    pub fn new(java: u64, registered_native: u64) -> Size {
        Size {
            java,
            registered_native,
        }
    }

    pub fn java_size(&self) -> u64 {
        self.java
    }

    pub fn registered_native_size(&self) -> u64 {
        self.registered_native
    }

    pub fn total(&self) -> u64 {
        self.java + self.registered_native
    }

    pub fn is_zero(&self) -> bool {
        self.java == 0 && self.registered_native == 0
    }

    pub fn plus(self, other: Size) -> Size {
        Size {
            java: self.java + other.java,
            registered_native: self.registered_native + other.registered_native,
        }
    }

    /// Signed difference of totals, used when reporting diffs
    pub fn delta(&self, baseline: &Size) -> i64 {
        self.total() as i64 - baseline.total() as i64
    }
}

impl Add for Size {
    type Output = Size;

    fn add(self, rhs: Size) -> Size {
        self.plus(rhs)
    }
}

impl AddAssign for Size {
    fn add_assign(&mut self, rhs: Size) {
        *self = self.plus(rhs);
    }
}

impl PartialOrd for Size {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Size {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total()
            .cmp(&other.total())
            .then(self.java.cmp(&other.java))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.registered_native == 0 {
            write!(f, "{}", self.java)
        } else {
            write!(f, "{} ({} native)", self.total(), self.registered_native)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_arithmetic() {
        let a = Size::new(10, 5);
        let b = Size::new(1, 0);
        let mut c = a + b;
        assert_eq!(c, Size::new(11, 5));
        c += Size::new(0, 3);
        assert_eq!(c.java_size(), 11);
        assert_eq!(c.registered_native_size(), 8);
        assert_eq!(c.total(), 19);
        assert!(Size::ZERO.is_zero());
        assert!(!b.is_zero());
    }

    #[test]
    fn test_size_ordering() {
        assert!(Size::new(10, 0) > Size::new(4, 5));
        assert!(Size::new(4, 6) > Size::new(9, 0));
        assert_eq!(Size::new(3, 4).delta(&Size::new(10, 0)), -3);
    }
}
