pub mod error;
pub mod llm;
pub mod normalize;
pub mod params;

pub use error::{ErrorKind, RelayError};
pub use llm::{
    CompletionProvider, CompletionRequest, Fragment, Message, ProviderId, RawChunk, RawStream,
    Role,
};
pub use normalize::{normalize, FragmentStream};
pub use params::{CompletionParams, ParamOverrides, Stop};
