pub mod cache;
pub mod config;
pub mod domain_age;
pub mod email;
pub mod http;
pub mod keywords;
pub mod lists;
pub mod probe;
pub mod reputation;
pub mod scoring;
pub mod verifier;

pub use config::Config;
pub use email::EmailAddress;
pub use scoring::{ScoreWeights, Verdict};
pub use verifier::{VerificationResult, Verifier};
