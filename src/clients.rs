pub mod embedder;
pub mod generator;

pub use embedder::RemoteEmbedder;
pub use generator::{
    ChatMessage, ChatRequest, GenerationError, GeneratorClient, SamplingParams, TextGenerator,
};
