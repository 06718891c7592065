//! Service layer: the Secret/Variable Engine, the rotation scheduler and
//! the authorization seam.

mod authorize;
mod item_service;
mod rotation;

pub use authorize::{AllowAll, Authorizer};
pub use item_service::{
    CreateItemRequest, EntryValue, EnvironmentValue, ItemService, ItemWithValues, ListItemsRequest,
    RotationSweep, UpdateItemRequest,
};
pub use rotation::RotationScheduler;
