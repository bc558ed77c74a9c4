pub mod planner;

pub use planner::{plan_tiles, TilePlan};
