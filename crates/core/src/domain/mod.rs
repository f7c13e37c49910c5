pub mod dialog;
pub mod event;
pub mod message;
pub mod retrieval;
