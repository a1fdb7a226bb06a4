pub mod classifier;
pub mod config;
pub mod error;
pub mod hook;
pub mod pattern;
pub mod snapshot;
pub mod store;
pub mod types;

pub use classifier::classify;
pub use config::{LoggingConfig, ParsedPolicy, PolicyFile, DEFAULT_REFRESH_MS};
pub use error::{ConfigError, RejectedTypeError, RejectionKind};
pub use hook::{admit, admit_with, AdmissionHook};
pub use pattern::{Matcher, PatternSet};
pub use snapshot::{CachedAllow, PolicySnapshot, SafeNameCache};
pub use store::{PolicyStore, StoreRegistry};
pub use types::{ListKind, Mode, Outcome, Reason, Verdict};
