//! PostgREST-style query strings: `column=eq.value`, `order=col.asc`, ...

/// Columns embedded with every message read.
pub const MESSAGE_SELECT: &str = "*, profiles(username, avatar_url)";

/// Membership rows with the member's profile; members without one are dropped.
pub const MEMBER_SELECT: &str = "user_id, profiles!inner(id, username, avatar_url, status)";

#[derive(Debug, Clone, Default)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.params.push(("select".into(), columns.into()));
        self
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.params.push((column.into(), format!("eq.{}", value.to_string())));
        self
    }

    /// Case-insensitive pattern match. `%` and `_` in `needle` are escaped so
    /// the match is a plain substring search.
    pub fn ilike_contains(mut self, column: &str, needle: &str) -> Self {
        let mut escaped = String::with_capacity(needle.len());
        for c in needle.chars() {
            if matches!(c, '%' | '_' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        self.params.push((column.into(), format!("ilike.*{}*", escaped)));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let dir = if ascending { "asc" } else { "desc" };
        self.params.push(("order".into(), format!("{}.{}", column, dir)));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.params.push(("limit".into(), n.to_string()));
        self
    }

    /// Upsert conflict target, used with `Prefer: resolution=merge-duplicates`.
    pub fn on_conflict(mut self, columns: &str) -> Self {
        self.params.push(("on_conflict".into(), columns.into()));
        self
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}
