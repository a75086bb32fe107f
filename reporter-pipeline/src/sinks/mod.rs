//! Delivery sinks for rendered reports.

pub mod discord;
pub mod file;
pub mod stdout;

pub use discord::DiscordSink;
pub use file::FileSink;
pub use stdout::StdoutSink;
