pub mod arrange;
pub mod config;
pub mod geometry;
pub mod id;
pub mod scene;
pub mod snapshot;

use id::Id;
