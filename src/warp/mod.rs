pub mod engine;

pub use engine::{warp_buffer, Context, WarpExecutor, WarpState, WarpSummary, WarpedTile};
