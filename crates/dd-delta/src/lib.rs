pub mod document;
pub mod engine;
pub mod seqdiff;
pub mod wire;

pub use document::{DeltaDocument, DeltaOp};
pub use engine::compute_delta;
pub use wire::{decode, encode};
