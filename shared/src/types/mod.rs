//! Coverage data types shared by the decoders, the merger and the formatter

pub mod coverage;
