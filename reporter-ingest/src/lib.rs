//! reporter-ingest: data providers that feed transactions into the report pipeline.

pub mod actual;
pub mod csv_file;
pub mod parse;

pub use actual::ActualProvider;
pub use csv_file::CsvProvider;
