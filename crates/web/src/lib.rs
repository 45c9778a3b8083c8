//! TestBridge in-process endpoints
//!
//! Tower layers that expose the running application to browser tests:
//! commands that run inside the application, a state reset endpoint, and
//! record/replay of outbound HTTP.

pub mod bridge;
pub mod commands;
pub mod context;
pub mod error;
pub mod helper;
pub mod stack;
pub mod state_reset;
pub mod vcr;

pub use bridge::{BeforeRequest, CommandBridge, CommandBridgeBuilder, CommandBridgeLayer};
pub use commands::{CommandHandler, CommandRegistry, CommandRequest, CommandSource};
pub use context::CommandContext;
pub use error::{BridgeError, BridgeResult};
pub use helper::HelperContext;
pub use stack::BridgeStack;
pub use state_reset::{StateReset, RESET_COMPLETED, RESET_PATHS};
pub use vcr::{Recorder, VcrInsertEjectLayer, VcrUseCassetteLayer};
