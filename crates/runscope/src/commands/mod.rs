pub mod attach;
pub mod ps;
