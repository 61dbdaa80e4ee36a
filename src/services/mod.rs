// src/services/mod.rs
pub mod image_processor;
pub mod orchestrator;
pub mod progress;
pub mod prompt;
pub mod redis_service;
pub mod run_manager;
pub mod run_store;
pub mod synthesis;

pub use image_processor::ImageProcessor;
pub use orchestrator::{GenerationRequest, Orchestrator, RunControl, RunFailure, SectionPolicy};
pub use progress::{ProgressEstimate, ProgressTracker};
pub use redis_service::RedisService;
pub use run_manager::RunManager;
pub use run_store::{MemoryStore, RunStore};
pub use synthesis::{ImageSynthesizer, OpenAiSynthesizer, SynthesisRequest, build_synthesizer};
