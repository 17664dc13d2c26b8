pub mod engine;
pub mod states;

pub use engine::ConversationEngine;
pub use states::{
    Advance, ConversationPhase, ConversationState, Instruction, PersistenceOutcome, Transition,
};
