//! Model families: DABNet and NARMA

pub mod dabnet;
pub mod narma;

pub use dabnet::{Dabnet, DabnetModel};
pub use narma::Narma;
