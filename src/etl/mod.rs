/// ETL Module
///
/// The three stages driven by the [`Pipeline`](crate::pipeline::Pipeline):
/// - Extract: fetch a range of blocks from the upstream provider
/// - Transform: flatten raw blocks into table rows
/// - Load: store one sub-batch and its checkpoint in a single transaction
pub mod extract;
pub mod load;
pub mod transform;
