//! Conversation engine: prompt composition, bounded memory, the turn
//! pipeline and the operator-facing operations around them.

pub mod companion;
pub mod compositor;
pub mod emoji;
pub mod error;
pub mod memory;
pub mod notify;
pub mod postprocess;
pub mod status;
pub mod turn;

pub use companion::{Companion, CompanionConfig, FlagsPatch, PersonaSummary};
pub use compositor::PromptCompositor;
pub use emoji::{EmojiDescriber, JobReport, JobTicket};
pub use error::EngineError;
pub use memory::MemoryManager;
pub use notify::WebhookNotifier;
pub use status::{ProbeReport, ServiceStatus};
pub use turn::{IgnoreReason, TurnOutcome, TurnRequest};
