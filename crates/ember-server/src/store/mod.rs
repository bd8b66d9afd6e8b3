pub mod crypto;
pub mod db;
pub mod model;

pub use crypto::{Cipher, EncryptionKey};
pub use db::Store;
pub use model::SecretRecord;
