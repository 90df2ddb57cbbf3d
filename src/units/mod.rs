mod gwei;

pub use gwei::GweiNewtype;
