pub mod connection;
pub mod fulltext;
pub mod mirror;
