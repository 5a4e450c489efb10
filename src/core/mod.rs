// Core modules implementing selection, local resolution, configuration and error modeling.
pub mod config;
pub mod error;
pub mod outcome;
pub mod registry;
pub mod resolver;
pub mod rooms;
pub mod selector;
