//! The 8-bit integrity signatures carried by command entries and mailboxes.
//!
//! A signature is an XOR-fold: the covered bytes are XORed together as 32-bit words
//! starting from a seed of `0xFF`, and the 32-bit result is folded down to 8 bits.
//! Because everything is XORed, the result does not depend on the byte order the words are read in.

/// The value every signature computation starts from.
pub const SIGNATURE_SEED: u32 = 0xFF;

/// Mixes one 32-bit word into a running signature.
#[inline]
pub const fn mix_u32(xor: u32, word: u32) -> u32 {
    xor ^ word
}

/// Mixes a 64-bit value into a running signature as its two 32-bit halves.
#[inline]
pub const fn mix_u64(xor: u32, value: u64) -> u32 {
    mix_u32(mix_u32(xor, (value >> 32) as u32), value as u32)
}

#[inline]
pub const fn mix_u8(xor: u32, byte: u8) -> u32 {
    xor ^ byte as u32
}

/// Folds a running 32-bit signature down to its final 8-bit value.
#[inline]
pub const fn mix_done(mut xor: u32) -> u8 {
    xor ^= xor >> 16;
    xor ^= xor >> 8;
    xor as u8
}

/// XOR-folds `bytes` from the seed.
/// A trailing partial word is treated as if zero-padded.
pub fn xor_fold(bytes: &[u8]) -> u8 {
    let xor = bytes.chunks(4).fold(SIGNATURE_SEED, |xor, chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        mix_u32(xor, u32::from_be_bytes(word))
    });
    mix_done(xor)
}

/// The value [`xor_fold`] returns over a command entry whose signature byte holds
/// the complement of the fold computed with that byte zeroed.
pub const SIGNED_ENTRY_FOLD: u8 = 0xFF;
