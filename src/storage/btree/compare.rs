use std::cmp::Ordering;

/// Three-way ordering over raw key bytes.
pub trait KeyComparator {
    /// Compares `a` against `b`.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Byte-wise comparison over the common prefix, shorter key first on a tie.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryCollation;

impl KeyComparator for BinaryCollation {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let common = a.len().min(b.len());
        a[..common]
            .cmp(&b[..common])
            .then_with(|| a.len().cmp(&b.len()))
    }
}

/// Orders 4-byte little-endian signed integer keys numerically.
///
/// Keys of any other length fall back to [`BinaryCollation`] and sort after every integer key.
#[derive(Clone, Copy, Debug, Default)]
pub struct I32Keys;

impl I32Keys {
    /// Encodes `value` the way this comparator expects to find it.
    pub fn encode(value: i32) -> [u8; 4] {
        value.to_le_bytes()
    }

    fn decode(key: &[u8]) -> Option<i32> {
        match key {
            [a, b, c, d] => Some(i32::from_le_bytes([*a, *b, *c, *d])),
            _ => None,
        }
    }
}

impl KeyComparator for I32Keys {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (Self::decode(a), Self::decode(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => BinaryCollation.compare(a, b),
        }
    }
}

impl<T: KeyComparator + ?Sized> KeyComparator for &T {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (**self).compare(a, b)
    }
}

impl<T: KeyComparator + ?Sized> KeyComparator for Box<T> {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (**self).compare(a, b)
    }
}
