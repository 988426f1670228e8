pub mod cursor;
pub mod index;
pub mod orchestrator;
pub mod tagger;
