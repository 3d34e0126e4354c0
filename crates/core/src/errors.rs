use thiserror::Error;

use crate::options::TrackerError;
use crate::ports::{DirectoryError, MappingStoreError, TransportError};

/// Failures scoped to one conversation or one media batch.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DialogError {
    #[error("lookup unavailable: {0}")]
    LookupUnavailable(#[from] TrackerError),
    #[error("invalid input: {0}")]
    InvalidUserInput(String),
    #[error("attachment `{file_ref}` could not be downloaded: {reason}")]
    AttachmentDownloadFailed { file_ref: String, reason: String },
    #[error("task submission failed: {0}")]
    SubmissionFailed(String),
    #[error("no task is being created in this chat")]
    NoActiveSession,
    #[error("user `{0}` is not configured for task creation")]
    UnknownUser(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Dialog(#[from] DialogError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<TransportError> for ApplicationError {
    fn from(value: TransportError) -> Self {
        Self::Integration(value.to_string())
    }
}

impl From<MappingStoreError> for ApplicationError {
    fn from(value: MappingStoreError) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<DirectoryError> for ApplicationError {
    fn from(value: DirectoryError) -> Self {
        Self::Configuration(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "That did not work. Check your input and try again.",
            Self::ServiceUnavailable { .. } => {
                "The tracker or chat service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Dialog(
                error @ (DialogError::InvalidUserInput(_)
                | DialogError::NoActiveSession
                | DialogError::UnknownUser(_)),
            ) => Self::BadRequest { message: error.to_string(), correlation_id: unassigned() },
            ApplicationError::Dialog(error) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DialogError, InterfaceError};
    use crate::options::TrackerError;
    use crate::ports::TransportError;

    #[test]
    fn invalid_input_maps_to_bad_request_with_correlation() {
        let interface =
            ApplicationError::from(DialogError::InvalidUserInput("not a number".to_owned()))
                .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert_eq!(interface.correlation_id(), "req-1");
    }

    #[test]
    fn tracker_failures_map_to_service_unavailable() {
        let interface = ApplicationError::from(DialogError::from(TrackerError::Status {
            status: 503,
            body: "maintenance".to_owned(),
        }))
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The tracker or chat service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn transport_failures_are_integration_errors() {
        let error = ApplicationError::from(TransportError::Request("timeout".to_owned()));
        assert!(matches!(error, ApplicationError::Integration(ref message) if message.contains("timeout")));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("users file missing".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
