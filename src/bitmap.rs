use serde::{Deserialize, Serialize};

const INIT_LEN: usize = 32;
const DEFAULT_CAPACITY: usize = 1 << 32;

/// Dense, growable bit vector. Growth happens lazily on `set`: bytes beyond
/// the materialized length are treated as unset by every read operation
/// without being allocated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "BitmapRepr", into = "BitmapRepr")]
pub struct Bitmap {
    arr: Vec<u8>,
    ones: usize,
    capacity: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct BitmapRepr {
    arr: Vec<u8>,
    ones: usize,
    capacity: usize,
}

impl From<BitmapRepr> for Bitmap {
    fn from(r: BitmapRepr) -> Self {
        Bitmap {
            arr: r.arr,
            ones: r.ones,
            capacity: r.capacity,
        }
    }
}

impl From<Bitmap> for BitmapRepr {
    fn from(b: Bitmap) -> Self {
        BitmapRepr {
            arr: b.arr,
            ones: b.ones,
            capacity: b.capacity,
        }
    }
}

impl Bitmap {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity > 0 {
            capacity
        } else {
            DEFAULT_CAPACITY
        };
        Bitmap {
            arr: vec![0u8; INIT_LEN],
            ones: 0,
            capacity,
        }
    }

    pub fn cap(&self) -> usize {
        self.capacity
    }

    pub fn ones(&self) -> usize {
        self.ones
    }

    /// Sets `pos`, growing the backing array if needed. Fails if `pos` is
    /// outside `[0, capacity)`. Idempotent on the set count.
    pub fn set(&mut self, pos: usize) -> Result<(), String> {
        if pos >= self.capacity {
            return Err(format!("position {pos} out of range (cap={})", self.capacity));
        }
        let byte = pos >> 3;
        if byte >= self.arr.len() {
            self.arr.resize(byte + 1, 0);
        }
        let mask = 1u8 << (pos & 0x7);
        if self.arr[byte] & mask == 0 {
            self.ones += 1;
            self.arr[byte] |= mask;
        }
        Ok(())
    }

    /// Unsets `pos`. A no-op outside the materialized range.
    pub fn unset(&mut self, pos: usize) {
        if pos >= self.arr.len() << 3 {
            return;
        }
        let byte = pos >> 3;
        let mask = 1u8 << (pos & 0x7);
        if self.arr[byte] & mask != 0 {
            self.ones -= 1;
            self.arr[byte] &= !mask;
        }
    }

    /// Returns false outside the materialized range, never grows.
    pub fn get(&self, pos: usize) -> bool {
        if pos >= self.arr.len() << 3 {
            return false;
        }
        self.arr[pos >> 3] & (1u8 << (pos & 0x7)) != 0
    }

    /// Scans byte-aligned, skipping full (`0xFF`) bytes, for the first
    /// unset bit at or after `start`. Returns `-1` if the scan passes
    /// `capacity` without finding one.
    pub fn first_unset(&self, start: usize) -> i64 {
        let mut i = start >> 3;
        let mut j = start & 0x7;

        while i < self.arr.len() {
            if self.arr[i] == 0xFF {
                i += 1;
                j = 0;
                continue;
            }
            while j < 8 {
                if self.arr[i] & (1u8 << j) == 0 {
                    return ((i << 3) | j) as i64;
                }
                j += 1;
            }
            i += 1;
            j = 0;
        }

        let pos = (i << 3) | j;
        if pos >= self.capacity { -1 } else { pos as i64 }
    }

    /// Scans byte-aligned, skipping empty (`0x00`) bytes, for the first set
    /// bit at or after `start`. Returns `-1` if the scan passes `capacity`
    /// without finding one.
    pub fn first_set(&self, start: usize) -> i64 {
        let mut i = start >> 3;
        let mut j = start & 0x7;

        while i < self.arr.len() {
            if self.arr[i] == 0x00 {
                i += 1;
                j = 0;
                continue;
            }
            while j < 8 {
                if self.arr[i] & (1u8 << j) != 0 {
                    return ((i << 3) | j) as i64;
                }
                j += 1;
            }
            i += 1;
            j = 0;
        }

        let pos = (i << 3) | j;
        if pos >= self.capacity { -1 } else { pos as i64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let mut bm = Bitmap::new(256);
        assert!(!bm.get(5));
        bm.set(5).unwrap();
        assert!(bm.get(5));
        assert_eq!(bm.ones(), 1);
    }

    #[test]
    fn set_is_idempotent() {
        let mut bm = Bitmap::new(256);
        bm.set(5).unwrap();
        bm.set(5).unwrap();
        assert_eq!(bm.ones(), 1);
    }

    #[test]
    fn set_out_of_range_fails() {
        let mut bm = Bitmap::new(8);
        assert!(bm.set(8).is_err());
    }

    #[test]
    fn unset_outside_materialized_is_noop() {
        let mut bm = Bitmap::new(1 << 20);
        bm.unset(100_000); // well beyond the 32-byte initial array
        assert!(!bm.get(100_000));
    }

    #[test]
    fn get_beyond_materialized_does_not_grow() {
        let bm = Bitmap::new(1 << 20);
        assert!(!bm.get(100_000));
        assert_eq!(bm.ones(), 0);
    }

    #[test]
    fn first_unset_skips_full_bytes() {
        let mut bm = Bitmap::new(256);
        for i in 0..8 {
            bm.set(i).unwrap();
        }
        assert_eq!(bm.first_unset(0), 8);
    }

    #[test]
    fn first_unset_with_only_bit_zero_set_returns_one() {
        let mut bm = Bitmap::new(256);
        bm.set(0).unwrap();
        assert_eq!(bm.first_unset(0), 1);
    }

    #[test]
    fn first_unset_beyond_materialized_returns_materialized_len() {
        let bm = Bitmap::new(1 << 20);
        assert_eq!(bm.first_unset(1_000_000), (INIT_LEN * 8) as i64);
    }

    #[test]
    fn first_set_skips_empty_bytes() {
        let mut bm = Bitmap::new(256);
        bm.set(20).unwrap();
        assert_eq!(bm.first_set(0), 20);
    }

    #[test]
    fn json_roundtrip_preserves_state() {
        let mut bm = Bitmap::new(256);
        bm.set(1).unwrap();
        bm.set(9).unwrap();
        let json = serde_json::to_string(&bm).unwrap();
        let back: Bitmap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ones(), bm.ones());
        assert_eq!(back.cap(), bm.cap());
        assert_eq!(back.arr, bm.arr);
    }
}
