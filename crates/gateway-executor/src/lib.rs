//! C8 Credential Executor: picks an eligible `Auth`, dispatches to a
//! `ProviderDriver`, and feeds outcomes back into the C7 registry.

pub mod driver;
pub mod echo;
pub mod executor;
pub mod selection;
pub mod summarizer_adapter;

pub use driver::{DriverError, DriverErrorKind, DriverRequest, ProviderDriver, StreamChunk, StreamResult, TokenUsage};
pub use echo::EchoProviderDriver;
pub use executor::{CredentialExecutor, ExecutorConfig};
pub use selection::select_candidate;
