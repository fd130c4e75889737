pub mod conference;
pub mod config;
pub mod db;
pub mod environment;
pub mod errors;
pub mod locks;
pub mod normalization;
pub mod recording;
pub mod routes;
pub mod service;
pub mod urls;
