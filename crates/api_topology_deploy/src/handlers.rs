pub mod deploy;
pub mod pipeline;
pub mod qa_gate;
pub mod synth;
