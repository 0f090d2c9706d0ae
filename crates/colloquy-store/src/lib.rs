pub mod memory_store;
pub mod model_store;

pub use memory_store::{MemoryObserverId, MemoryStore};
pub use model_store::{
    DEFAULT_MAX_ASSOCIATED_CONTENT_LENGTH, Model, ModelAccess, ModelCategory, ModelOptions,
    ModelStore,
};
