//! Book catalog models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub charge: f64,
    pub quantity: i64,
    pub available: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Book {
    /// The catalog invariant: a book is available exactly when copies remain.
    pub fn availability(&self) -> bool {
        self.quantity > 0
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBookRequest {
    pub title: String,
    pub author: String,
    pub description: String,
    pub charge: f64,
    pub quantity: i64,
}

/// Catalog projection returned to clients. `available` is recomputed from
/// the current quantity rather than trusted from the stored column.
#[derive(Debug, Clone, Serialize)]
pub struct BookResponse {
    pub id: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub charge: f64,
    pub quantity: i64,
    pub available: bool,
    pub created_at: String,
}

impl From<Book> for BookResponse {
    fn from(book: Book) -> Self {
        let available = book.availability();
        Self {
            id: book.id,
            title: book.title,
            author: book.author,
            description: book.description,
            charge: book.charge,
            quantity: book.quantity,
            available,
            created_at: book.created_at,
        }
    }
}
