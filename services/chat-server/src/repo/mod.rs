pub mod files;
pub mod friends;
pub mod groups;
pub mod join_requests;
pub mod messages;
pub mod pending_commands;
pub mod users;
