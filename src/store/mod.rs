pub mod archive;
pub mod checkpoint;
pub mod database;
pub mod lock;
