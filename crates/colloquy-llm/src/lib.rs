pub mod engine;
pub mod error;
pub mod response;
pub mod turn;

pub use engine::{
    EngineConsumer, GenerationRequest, PageContent, PageContentKind, RequestCapability,
    ToolDefinition,
};
pub use error::ApiError;
pub use response::EngineResponse;
pub use turn::{
    ActionType, CharacterType, ContentBlock, ConversationEntryEvent, ConversationTurn, Skill,
    ToolUseEvent, UploadedFile, UploadedFileKind, WebSource,
};
