use thiserror::Error;

/// Returned by [`Bitfield::from_flags`] when a flag byte carries bits other than
/// the present and verified flags.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("piece flag {index} has unknown value {value}")]
pub struct InvalidFlag {
    pub index: usize,
    pub value: u8,
}

/// A `Bitfield` records which pieces of a content item are verified present.
///
/// Each piece is represented by a single bit: `1` if the piece is present and
/// safe to read, `0` if not. Bits are stored **most-significant-bit first**
/// within each byte, the same packing the BitTorrent wire protocol uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    length: usize,
}

impl Bitfield {
    /// Creates a new `Bitfield` of the given length (number of pieces),
    /// with every piece missing.
    pub fn new(length: usize) -> Self {
        Bitfield {
            bits: vec![0; length.div_ceil(8)],
            length,
        }
    }

    /// Constructs a `Bitfield` from packed bytes and a number of pieces.
    ///
    /// # Panics
    ///
    /// Panics if `bytes.len()` is insufficient for the given length.
    pub fn from_bytes(bytes: Vec<u8>, length: usize) -> Self {
        assert!(bytes.len() >= length.div_ceil(8), "not enough bytes");
        Bitfield {
            bits: bytes,
            length,
        }
    }

    /// Builds a `Bitfield` from one byte per piece, as stored in libtorrent
    /// resume data. Bit 0 marks the piece present; bit 1 is libtorrent's
    /// seed-mode "verified" flag and is ignored. Any higher bit is rejected.
    pub fn from_flags(flags: &[u8]) -> Result<Self, InvalidFlag> {
        let mut bitfield = Bitfield::new(flags.len());
        for (index, &value) in flags.iter().enumerate() {
            if value > 3 {
                return Err(InvalidFlag { index, value });
            }
            if value & 1 == 1 {
                bitfield.set(index, true);
            }
        }
        Ok(bitfield)
    }

    /// Sets the bit corresponding to the given piece index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.length, "index out of range");
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        if value {
            self.bits[byte_index] |= 1 << bit_index;
        } else {
            self.bits[byte_index] &= !(1 << bit_index);
        }
    }

    /// Returns `true` if the piece at the given index is present.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.length, "index out of range");
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);
        (self.bits[byte_index] & (1 << bit_index)) != 0
    }

    /// Number of pieces tracked.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of pieces marked present.
    pub fn count_ones(&self) -> usize {
        self.iter().filter(|present| *present).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.length).map(move |i| self.get(i))
    }

    /// Returns the underlying packed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

impl FromIterator<bool> for Bitfield {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let flags: Vec<bool> = iter.into_iter().collect();
        let mut bitfield = Bitfield::new(flags.len());
        for (i, present) in flags.into_iter().enumerate() {
            if present {
                bitfield.set(i, true);
            }
        }
        bitfield
    }
}
