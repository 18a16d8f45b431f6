/// Snapshot export
///
/// - format: pure encoders (JSON, Google Maps JavaScript)
/// - writer: periodic, whole-file replacement on disk
pub mod format;
pub mod writer;
