//! Internal building blocks shared by the public facades.

pub mod client;
pub mod message_parser;
pub mod query;
