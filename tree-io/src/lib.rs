//! Reading and writing data sets and models.

/// gzip-transparent line readers and writers
pub mod common_io;

/// Delimited text data sets with missing values
pub mod data_io;

/// Network text format
pub mod model_io;

pub use data_io::{read_data, write_data};
pub use model_io::{read_model, write_model, ModelAnnotation};
