pub mod endpoints;
pub mod pipeline;
