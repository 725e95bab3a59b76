pub mod facade;
pub mod fingerprint;
pub mod handlers;
pub mod types;

pub use facade::{ErrorCoordinationFacade, ErrorFacadeConfig};
pub use fingerprint::{compute_fingerprint, extract_message_template};
pub use handlers::{default_handlers, ErrorHandler};
pub use types::{ErrorContext, ErrorPattern, ErrorRecord, ErrorSeverity, ErrorType, ServiceFailureCounter};
