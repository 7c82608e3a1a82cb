//! Task data model.

pub mod model;

pub use model::{
    Command, Deliverable, ImagePosition, Priority, RouteLabel, SourceAsset, Task, TaskId,
    TaskSnapshot, TaskStatus, asset_id_from_filename,
};
