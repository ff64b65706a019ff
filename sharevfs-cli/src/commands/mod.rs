pub mod ls;
pub mod mount;
pub mod resolve;
pub mod set;
pub mod stats;
pub mod tree;
