pub mod comments;
pub mod database;
pub mod metakeys;
pub mod objects;
pub mod relations;
pub mod schema;
pub mod sharing;
pub mod tags;
