//! SP800-108 KDF in counter mode, PRF = HMAC-SHA-512.
//!
//! Per-block PRF input:
//!   u32_be(i) || label || 0x00 || context || u32_be(bits_requested)
//! with the counter i starting at 1.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::error::CryptographicFailure;

type HmacSha512 = Hmac<Sha512>;

/// Derive exactly `out_len` bytes from `kdk`.
///
/// `label` binds the output to its use (here: the payload AAD) and `context`
/// to the per-payload randomness (key modifier plus IV/nonce).
pub fn derive(
    kdk: &[u8],
    label: &[u8],
    context: &[u8],
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptographicFailure> {
    let bits = u32::try_from(out_len.checked_mul(8).ok_or(CryptographicFailure)?)
        .map_err(|_| CryptographicFailure)?;
    let bits_be = bits.to_be_bytes();

    let mut out = Zeroizing::new(Vec::with_capacity(out_len));
    let mut counter: u32 = 1;
    while out.len() < out_len {
        let mut prf =
            <HmacSha512 as Mac>::new_from_slice(kdk).map_err(|_| CryptographicFailure)?;
        prf.update(&counter.to_be_bytes());
        prf.update(label);
        prf.update(&[0x00]);
        prf.update(context);
        prf.update(&bits_be);

        let block = prf.finalize().into_bytes();
        let take = usize::min(block.len(), out_len - out.len());
        out.extend_from_slice(&block[..take]);
        counter = counter.checked_add(1).ok_or(CryptographicFailure)?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KDK: &[u8] = b"0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn output_has_exact_length() {
        for len in [1, 31, 32, 33, 64, 65, 96, 128, 200] {
            let out = derive(KDK, b"label", b"context", len).unwrap();
            assert_eq!(out.len(), len);
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive(KDK, b"label", b"context", 80).unwrap();
        let b = derive(KDK, b"label", b"context", 80).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn label_and_context_both_matter() {
        let base = derive(KDK, b"label", b"context", 64).unwrap();
        let other_label = derive(KDK, b"label2", b"context", 64).unwrap();
        let other_context = derive(KDK, b"label", b"context2", 64).unwrap();
        let other_kdk = derive(b"another key derivation key..............", b"label", b"context", 64).unwrap();
        assert_ne!(*base, *other_label);
        assert_ne!(*base, *other_context);
        assert_ne!(*base, *other_kdk);
    }

    #[test]
    fn separator_prevents_boundary_shifts() {
        // ("ab", "c") and ("a", "bc") concatenate identically; the 0x00
        // separator must keep their outputs apart.
        let a = derive(KDK, b"ab", b"c", 64).unwrap();
        let b = derive(KDK, b"a", b"bc", 64).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn requested_length_is_bound_into_every_block() {
        // L is part of the PRF input, so a longer request is not an
        // extension of a shorter one.
        let short = derive(KDK, b"label", b"context", 32).unwrap();
        let long = derive(KDK, b"label", b"context", 64).unwrap();
        assert_ne!(*short, long[..32]);
    }
}
