mod deactivate;

pub use deactivate::*;
