pub mod batcher;
pub mod intake;
pub mod pipeline;
