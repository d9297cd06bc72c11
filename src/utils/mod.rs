pub mod crypto;
pub mod logger;
pub mod redact;
