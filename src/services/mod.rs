// Services module - business logic layer

pub mod auth;
pub mod idhash;
pub mod imageresize;
pub mod search;

// Item metadata
pub mod metadata;
pub mod nfo;
