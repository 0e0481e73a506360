pub mod client;
pub mod strategy;

pub use client::{CredentialPlacement, TokenClient};
pub use strategy::{candidate_strategies, first_success, FallbackProber, Strategy};
