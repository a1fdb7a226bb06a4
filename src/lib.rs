//! serialgate: type-name admission filter for untrusted deserialization
//!
//! A deserializer asks the filter about every type it is about to
//! instantiate. The filter answers from a hot-reloadable policy:
//! - Blacklist rules (exact names and regexes) reject known gadget types
//! - Whitelist rules admit only expected types
//! - Profiling mode records would-be verdicts without blocking anything

pub mod audit;
pub mod policy;

pub use audit::{AuditKind, AuditLevel, AuditRecord, AuditSink, FileSink, MemorySink, TracingSink};
pub use policy::{
    admit, classify, AdmissionHook, ConfigError, ParsedPolicy, PolicySnapshot, PolicyStore,
    RejectedTypeError, RejectionKind, StoreRegistry, Verdict,
};
