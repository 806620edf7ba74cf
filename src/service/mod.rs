pub mod auto_execute;
pub mod convert;

pub use auto_execute::{AutoExecuteOptions, AutoExecutor, ProgressEvent};
pub use convert::Converter;
