//! Wire format types for the vendor HTTP APIs
//!
//! Plain serde structs used only at the request/response boundary.

pub mod anthropic;
pub mod google;
pub mod openai;
