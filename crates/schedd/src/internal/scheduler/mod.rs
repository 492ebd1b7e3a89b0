pub mod assign;
pub mod category;
pub mod dispatch;
pub mod ledger;
pub mod main;
pub mod messages;
pub mod orders;
pub mod split;
pub mod tickets;
