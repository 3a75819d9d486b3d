//! Conversion between the canonical request/response types and vendor wire formats

pub mod anthropic;
pub mod google;
pub mod openai;
