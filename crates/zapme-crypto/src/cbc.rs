//! In-place AES-256-CBC over whole blocks
//!
//! The IV register is advanced to the last ciphertext block, so a stream can
//! be processed in any number of block-aligned pieces and still produce the
//! same bytes as a single pass.

use aes::cipher::{BlockDecrypt, BlockEncrypt};
use aes::{Aes256Dec, Aes256Enc, Block};

use crate::{BLOCK_SIZE, IV_SIZE};

/// Encrypt `data` in place. `data.len()` must be a multiple of [`BLOCK_SIZE`];
/// a trailing partial block is left untouched.
pub fn encrypt_in_place(cipher: &Aes256Enc, iv: &mut [u8; IV_SIZE], data: &mut [u8]) {
    debug_assert_eq!(data.len() % BLOCK_SIZE, 0, "CBC input must be block aligned");
    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        for (byte, chain) in chunk.iter_mut().zip(iv.iter()) {
            *byte ^= chain;
        }
        cipher.encrypt_block(Block::from_mut_slice(chunk));
        iv.copy_from_slice(chunk);
    }
}

/// Decrypt `data` in place. Same alignment rule as [`encrypt_in_place`].
pub fn decrypt_in_place(cipher: &Aes256Dec, iv: &mut [u8; IV_SIZE], data: &mut [u8]) {
    debug_assert_eq!(data.len() % BLOCK_SIZE, 0, "CBC input must be block aligned");
    let mut next_iv = [0u8; IV_SIZE];
    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        next_iv.copy_from_slice(chunk);
        cipher.decrypt_block(Block::from_mut_slice(chunk));
        for (byte, chain) in chunk.iter_mut().zip(iv.iter()) {
            *byte ^= chain;
        }
        *iv = next_iv;
    }
}
