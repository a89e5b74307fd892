//! Product Quantization: subspace partitioning, per-subspace codebooks,
//! encode/refine, the three standard ADC scorers, and the Quicker-ADC fused
//! variant.

mod compressor;
mod quicker_adc;
mod vectors;

pub use compressor::{PqCompressor, PqParams};
pub use quicker_adc::QuickerAdcDecoder;
pub use vectors::{MutablePqVectors, PqVectors};
