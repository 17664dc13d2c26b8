pub mod audit;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod lead;
pub mod script;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
pub use conversation::{
    Advance, ConversationEngine, ConversationPhase, ConversationState, Instruction,
    PersistenceOutcome, Transition,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use lead::{InMemoryLeadStore, LeadRecord, LeadStore, LeadStoreError};
pub use script::{QuestionScript, ScriptError, ScriptQuestion};
