//! Random invitation code generation.

use crate::{InviteError, InviteResult};
use rand::rngs::OsRng;
use rand::RngCore;

/// Characters a code is drawn from.
pub const CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Fixed length of every generated code.
pub const CODE_LENGTH: usize = 8;

// Largest multiple of the alphabet size that fits in a byte; bytes at or above
// it are rejected so every character stays equally likely.
const ACCEPT_BELOW: u8 = (256 / CODE_ALPHABET.len() * CODE_ALPHABET.len()) as u8;

/// Source of candidate codes.
///
/// Implementations only produce candidates; uniqueness is always checked by
/// the store on insert.
pub trait CodeSource: Send + Sync {
    fn generate(&self) -> InviteResult<String>;
}

/// Uniform codes from the operating system's CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeSource;

impl CodeSource for RandomCodeSource {
    fn generate(&self) -> InviteResult<String> {
        let mut code = String::with_capacity(CODE_LENGTH);
        let mut buf = [0u8; 16];

        while code.len() < CODE_LENGTH {
            OsRng
                .try_fill_bytes(&mut buf)
                .map_err(|e| InviteError::Generator(format!("random source unavailable: {e}")))?;

            for byte in buf.iter().copied().filter(|b| *b < ACCEPT_BELOW) {
                code.push(CODE_ALPHABET[usize::from(byte) % CODE_ALPHABET.len()] as char);
                if code.len() == CODE_LENGTH {
                    break;
                }
            }
        }

        Ok(code)
    }
}

/// Whether `code` has the generated shape.
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}
