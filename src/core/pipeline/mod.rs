pub mod aggregate;
pub mod compiling;
pub mod dispatch;
pub mod judge;
pub mod running;
pub mod staging;
