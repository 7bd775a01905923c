pub mod fma;
pub mod inputs;

pub use fma::{fma_host, FmaOutput, HostFmaBuilder};
pub use inputs::{generate_inputs, generate_into, FmaInputs};
