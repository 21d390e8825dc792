mod schema;
mod models;

pub use schema::Database;
pub use models::{Bookmark, Group, IconLookupEntry, GLYPH_PREFIX};
