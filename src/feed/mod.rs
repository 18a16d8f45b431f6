/// Feed module
///
/// Everything between the BaseStation TCP port and the grid:
/// - parser: one text line → zero or one position
/// - connection: connect / stream / back off / retry, forever
///
/// The feed layer only ever calls `GridAccumulator::place`.
pub mod connection;
pub mod parser;
