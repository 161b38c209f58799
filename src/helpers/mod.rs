pub mod archive;
pub mod cipher;
pub mod dockerfile;
pub(crate) mod json;
pub mod retry;
pub mod sanitize;

pub use cipher::SecretCipher;
pub use json::*;
