pub mod access;
pub mod admin;
pub mod api;
pub mod auth;
pub mod comments;
pub mod config;
pub mod db;
pub mod embed;
pub mod error;
pub mod feed;
pub mod files;
pub mod follows;
pub mod forms;
pub mod groups;
pub mod model;
pub mod posts;
pub mod users;
pub mod views;
