pub mod assembler;
pub mod content;
pub mod image;
pub mod llm;
pub mod prompts;
pub mod tts;
pub mod workflow;
