pub mod convert;
pub mod decode;
