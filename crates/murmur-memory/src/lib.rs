//! Murmur Memory crate - classification, routing, and retrieval of chat memories.
//!
//! Every archived utterance is classified into a durability tier
//! (temporary, personal, chat) and optionally flagged for a proactive
//! follow-up. The router writes it to the TTL cache or to the matching
//! vector namespace and schedules the follow-up; the retrieval composer
//! answers live queries from the long-term namespaces.

pub mod care;
pub mod classifier;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod retrieval;
pub mod router;
pub mod switches;
pub mod temporary;

pub use care::CareReplyComposer;
pub use classifier::{Classification, FallbackCause, MemoryClassifier, ProactiveSignal};
pub use error::{LlmError, MemoryError};
pub use llm::{CompletionService, HttpCompletionService, ScriptedCompletion};
pub use pipeline::{MemoryPipeline, PipelineOutcome, SkipReason};
pub use retrieval::{
    format_relative_age, Memory, Retrieval, RetrievalComposer, RetrievalFilter, SceneHints,
};
pub use router::{ArchivedMessage, MemoryBackends, MemoryRouter, RouteOutcome};
pub use switches::GroupSwitches;
pub use temporary::TemporaryMemory;
