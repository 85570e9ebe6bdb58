pub mod access;
pub mod callback_data;
pub mod commands;
pub mod navigation;
pub mod responses;
pub mod retrieval;
