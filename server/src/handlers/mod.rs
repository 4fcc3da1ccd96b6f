pub mod create;
pub mod redirect;
pub mod stats;
