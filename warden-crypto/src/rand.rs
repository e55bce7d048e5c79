//! Secure random source. Thin wrapper over the platform RNG.

use crate::error::CryptographicFailure;

/// Fill `buf` with cryptographically secure random bytes.
pub fn fill(buf: &mut [u8]) -> Result<(), CryptographicFailure> {
    getrandom::getrandom(buf).map_err(|_| CryptographicFailure)
}

/// Sample a fixed-size array of random bytes.
pub fn array<const N: usize>() -> Result<[u8; N], CryptographicFailure> {
    let mut out = [0u8; N];
    fill(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_produces_distinct_buffers() {
        let a = array::<16>().unwrap();
        let b = array::<16>().unwrap();
        assert_ne!(a, b);
    }
}
