//! Random byte source for keys, identities and IVs

use rand::{CryptoRng, RngCore};

/// Supplies cryptographically suitable random bytes.
pub trait RandomSource {
    fn fill(&mut self, buf: &mut [u8]);
}

impl<R: RngCore + CryptoRng> RandomSource for R {
    fn fill(&mut self, buf: &mut [u8]) {
        self.fill_bytes(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::{OsRng, StdRng};
    use rand::SeedableRng;

    fn draw<R: RandomSource>(rng: &mut R) -> [u8; 32] {
        let mut buf = [0u8; 32];
        rng.fill(&mut buf);
        buf
    }

    #[test]
    fn test_os_rng_differs() {
        assert_ne!(draw(&mut OsRng), draw(&mut OsRng));
    }

    #[test]
    fn test_seeded_rng_deterministic() {
        let a = draw(&mut StdRng::seed_from_u64(7));
        let b = draw(&mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
