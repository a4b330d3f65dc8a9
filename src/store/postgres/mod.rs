// src/store/postgres/mod.rs

mod orders;
mod products;
mod sagas;
mod users;

pub use orders::PgOrderStore;
pub use products::PgProductStore;
pub use sagas::PgSagaStore;
pub use users::PgUserStore;

/// Escapes LIKE metacharacters and wraps the term for a substring match.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
