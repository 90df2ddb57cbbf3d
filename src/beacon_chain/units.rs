mod slot;

pub use slot::slot_from_string;
pub use slot::Slot;
