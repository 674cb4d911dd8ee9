pub mod catalog;
pub mod directory;
pub mod header;
pub mod ledger;
pub mod sequence;
