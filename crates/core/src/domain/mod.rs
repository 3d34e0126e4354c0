pub mod field;
pub mod record;
pub mod settings;

pub use field::{
    descriptor, BuiltinOptions, FieldDescriptor, FieldName, InputKind, LookupKind, OptionOrigin,
};
pub use record::{
    Attachment, AttachmentSet, MediaCategory, ProjectContext, RecordId, SprintRef, TaskRecord,
};
pub use settings::{FieldConfig, UserProfile, UserSettings};
