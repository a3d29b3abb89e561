pub mod aes_stream;
pub mod hash;

pub use aes_stream::{CfbDecryptor, CfbEncryptor, DecryptingReader, EncryptingWriter};
