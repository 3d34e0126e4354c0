pub mod carry_over;
pub mod config;
pub mod dialog;
pub mod domain;
pub mod errors;
pub mod finalize;
pub mod flows;
pub mod media;
pub mod options;
pub mod ports;
pub mod resolver;

pub use carry_over::CarryCategory;
pub use dialog::TaskDialogService;
pub use domain::field::{FieldDescriptor, FieldName, InputKind};
pub use domain::record::{Attachment, AttachmentSet, MediaCategory, RecordId, TaskRecord};
pub use domain::settings::{FieldConfig, UserProfile, UserSettings};
pub use errors::{ApplicationError, DialogError, InterfaceError};
pub use finalize::{Finalizer, IssueRef, IssueRequest, Submission, SubmissionOrigin};
pub use flows::{
    Clock, DialogInput, DialogSession, DialogState, Notice, Prompt, RecordBuilder, SystemClock,
    TransitionOutcome,
};
pub use media::{AggregatorSettings, MediaAggregator, MediaAggregatorHandle, MediaMessage};
pub use options::{CacheTtls, CachedOptionSource, OptionItem, OptionSource, TrackerError};
pub use ports::{
    ChatTransport, ConversationKey, IssueMapping, MappingStore, MessageRef, TransportError,
    UserDirectory,
};
