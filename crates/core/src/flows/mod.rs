pub mod engine;
pub mod states;

pub use engine::{next_field, Clock, DialogSession, FixedClock, RecordBuilder, SystemClock};
pub use states::{
    CarryOverChoice, DialogInput, DialogState, Notice, Prompt, PromptControls, TransitionOutcome,
};
