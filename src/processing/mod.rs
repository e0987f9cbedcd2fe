//! Payload decoding and fragment reassembly

pub mod parser;
pub mod reassembly;

pub use parser::{DecodeError, DecodeResult, DeviceReport, Fragment, Frame};
pub use reassembly::{FragmentReassembler, Reassembly, ReassemblyStats};
