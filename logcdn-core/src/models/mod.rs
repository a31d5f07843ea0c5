pub mod id;
pub mod item;
pub mod line;
pub mod unit;

pub use id::{generate_id, ItemId, UnitId};
pub use item::{ApiRef, DeleteSelector, Item, ItemStatus, ItemType, MarkDeleteRequest};
pub use line::{format_line, Line, LogLevel};
pub use unit::{ItemUnit, StorageUnit, UnitRole};
