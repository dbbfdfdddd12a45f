//! The research agent for Quarry.
//!
//! A run follows a **search → read → answer** cycle:
//!
//! 1. **Build the prompt** (role, retrieval strategy, scope, capabilities,
//!    citation grammar, recent history)
//! 2. **Call the model** through the retry policy
//! 3. **If tool calls**: execute capabilities, feed results back, loop to 2
//! 4. **If text only**: extract sources from every capability result and
//!    return the answer
//!
//! The loop stops when the model answers without calling a capability or
//! when the step bound is reached. `research_stream` runs the same loop on
//! a task and bridges its progress into a `futures::Stream` of events.

pub mod bridge;
pub mod citation;
pub mod loop_runner;
pub mod prompt;
pub mod research;
pub mod sources;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bridge::{EventSink, ResearchStream, user_facing};
pub use citation::Citation;
pub use loop_runner::{AgentLoop, LoopOutcome, StepReport};
pub use research::ResearchAgent;
pub use sources::extract_sources;
pub use stream_event::ResearchEvent;
