//! Capability methods for the benchmarking engine
//!
//! Every public function here is a registered method: it declares its
//! parameters and registers a descriptor with the engine at link time, so
//! adding a new algorithm is a matter of adding a new function and its
//! `inventory::submit!` block. Linking this crate is enough to make all
//! methods resolvable through `MethodRegistry::global()`.

pub mod convolution;
pub mod datagen;
pub mod deconvolution;
pub mod evaluation;
pub mod fft;
pub mod ground_truth;
pub mod organize;
pub mod psf;
pub mod restoration;
pub mod training;
pub mod transforms;
mod util;
