//! Gateway protocol definitions
//!
//! Op codes, the JSON envelope, typed payloads, close codes and intents.

mod close_codes;
mod intents;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::GatewayCloseCode;
pub use intents::GatewayIntents;
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{HelloPayload, IdentifyPayload, ReadyPayload, ResumePayload};
