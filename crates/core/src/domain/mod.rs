pub mod catalog;
pub mod directory;
pub mod instance;
pub mod page;
