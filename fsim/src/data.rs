//! Fingerprint and record types, plus the fingerprinting seam.
//!
//! Actual fingerprinting belongs to an external chemistry toolkit; this
//! library only fixes the interface: SMILES in, fixed-width bit vector and
//! canonical SMILES out. [`HashedFingerprinter`] is a deterministic stand-in
//! good enough for the binaries and tests, and anything RDKit-backed can be
//! swapped in behind the same trait.

use ascii::AsciiStr;
use rand::{distributions::Alphanumeric, Rng};

use crate::error::Error;

/// GPU-side kernels want widths divisible by 32 bits.
pub const DEFAULT_BITCOUNT: usize = 1024;

const SMILES_EXTRA_CHARS: &str = "()[]{}=#@+-/\\%.:*$";

/// Fixed-width bit vector used as a similarity search key. Stored and
/// transmitted as its raw bytes, most significant bit of byte 0 first.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Fingerprint {
    pub data: Vec<u8>,
}

impl Fingerprint {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn zeroed(bit_count: usize) -> Self {
        Self { data: vec![0u8; bit_count / 8] }
    }

    pub fn bit_count(&self) -> usize {
        self.data.len() * 8
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn set_bit(&mut self, index: usize) {
        let byte = index / 8;
        let bit = index % 8;
        self.data[byte] |= 0x80 >> bit;
    }

    pub fn get_bit(&self, index: usize) -> bool {
        let byte = index / 8;
        let bit = index % 8;
        self.data[byte] & (0x80 >> bit) != 0
    }

    pub fn random(bit_count: usize) -> Self {
        let mut rng = rand::thread_rng();
        let data: Vec<u8> = (0..bit_count / 8).map(|_| rng.gen::<u8>()).collect();
        Self { data }
    }
}

/// One database entry. The three fields are stored as index-aligned parallel
/// arrays in the container format, never as a composite record.
#[derive(Debug, PartialEq, Clone)]
pub struct FingerprintRecord {
    pub fingerprint: Fingerprint,
    pub smiles: String,
    pub id: String,
}

impl FingerprintRecord {
    pub fn random(bit_count: usize) -> Self {
        let smiles: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(20)
            .map(char::from)
            .collect();

        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();

        Self {
            fingerprint: Fingerprint::random(bit_count),
            smiles,
            id,
        }
    }
}

/// External fingerprinting function. `trust` skips structural sanitization
/// for speed, accepting the risk of fingerprinting malformed-but-parseable
/// input. Returns the fingerprint and the canonicalized SMILES.
pub trait Fingerprinter {
    fn fingerprint(&self, smiles: &str, trust: bool) -> Result<(Fingerprint, String), Error>;
}

/// Character n-gram hashing into a fixed-width bit vector. Deterministic,
/// toolkit-free; canonicalization is the identity. Structural validation is
/// limited to the SMILES alphabet and balanced brackets.
#[derive(Debug, Clone)]
pub struct HashedFingerprinter {
    bit_count: usize,
}

impl HashedFingerprinter {
    /// Widths must be non-zero multiples of 32 bits; anything else would
    /// misalign the stored byte vectors and the search kernels.
    pub fn new(bit_count: usize) -> Result<Self, Error> {
        if bit_count == 0 || bit_count % 32 != 0 {
            return Err(Error::Config(format!(
                "fingerprint width {} is not a non-zero multiple of 32",
                bit_count
            )));
        }
        Ok(Self { bit_count })
    }

    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    fn validate(smiles: &str) -> Result<(), Error> {
        let mut parens: i64 = 0;
        let mut brackets: i64 = 0;
        for c in smiles.chars() {
            if !c.is_ascii_alphanumeric() && !SMILES_EXTRA_CHARS.contains(c) {
                return Err(Error::InvalidStructure(smiles.to_string()));
            }
            match c {
                '(' => parens += 1,
                ')' => parens -= 1,
                '[' => brackets += 1,
                ']' => brackets -= 1,
                _ => {}
            }
            if parens < 0 || brackets < 0 {
                return Err(Error::InvalidStructure(smiles.to_string()));
            }
        }
        if parens != 0 || brackets != 0 {
            return Err(Error::InvalidStructure(smiles.to_string()));
        }
        Ok(())
    }
}

impl Fingerprinter for HashedFingerprinter {
    fn fingerprint(&self, smiles: &str, trust: bool) -> Result<(Fingerprint, String), Error> {
        let smiles = smiles.trim();
        if smiles.is_empty() || AsciiStr::from_ascii(smiles).is_err() {
            return Err(Error::InvalidStructure(smiles.to_string()));
        }
        if !trust {
            Self::validate(smiles)?;
        }

        let bytes = smiles.as_bytes();
        let mut fp = Fingerprint::zeroed(self.bit_count);
        for width in 1..=3usize {
            if bytes.len() < width {
                break;
            }
            for window in bytes.windows(width) {
                fp.set_bit(fnv1a(window) as usize % self.bit_count);
            }
        }
        Ok((fp, smiles.to_string()))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        let (a, canon_a) = fingerprinter.fingerprint("CCO", false).unwrap();
        let (b, canon_b) = fingerprinter.fingerprint("CCO", false).unwrap();
        assert_eq!(a, b);
        assert_eq!(canon_a, canon_b);
        assert_eq!(a.bit_count(), DEFAULT_BITCOUNT);
        assert!(a.data.iter().any(|b| *b != 0));
    }

    #[test]
    fn different_smiles_differ() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        let (a, _) = fingerprinter.fingerprint("CCO", false).unwrap();
        let (b, _) = fingerprinter.fingerprint("c1ccccc1", false).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn bad_structures_are_rejected() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        for bad in ["invalid!!!", "", "C(C", "C]["] {
            let res = fingerprinter.fingerprint(bad, false);
            assert!(matches!(res, Err(Error::InvalidStructure(_))), "{:?}", bad);
        }
    }

    #[test]
    fn trust_mode_skips_sanitization() {
        let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
        assert!(fingerprinter.fingerprint("C(C", false).is_err());
        assert!(fingerprinter.fingerprint("C(C", true).is_ok());
        // Non-ascii input is never fingerprintable, trusted or not
        assert!(fingerprinter.fingerprint("CCÖ", true).is_err());
    }

    #[test]
    fn degenerate_widths_are_rejected() {
        // zero would divide by zero in the hasher, 7 and 40 would index
        // past the byte vector
        for bad in [0usize, 7, 40] {
            let res = HashedFingerprinter::new(bad);
            assert!(matches!(res, Err(Error::Config(_))), "{}", bad);
        }
        for good in [32usize, 64, DEFAULT_BITCOUNT] {
            let fingerprinter = HashedFingerprinter::new(good).unwrap();
            assert_eq!(fingerprinter.bit_count(), good);
            let (fp, _) = fingerprinter.fingerprint("CCO", false).unwrap();
            assert_eq!(fp.bit_count(), good);
        }
    }

    #[test]
    fn set_and_get_bits() {
        let mut fp = Fingerprint::zeroed(64);
        fp.set_bit(0);
        fp.set_bit(9);
        fp.set_bit(63);
        assert!(fp.get_bit(0));
        assert!(fp.get_bit(9));
        assert!(fp.get_bit(63));
        assert!(!fp.get_bit(1));
        assert_eq!(fp.data[0], 0x80);
        assert_eq!(fp.data[1], 0x40);
    }
}
