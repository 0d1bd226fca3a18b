//! Field-level conversion between local items and provider events, and the
//! registry that links them.

mod assignment;
pub mod fields;
pub mod recurrence;
mod registry;
pub mod timezone;

pub use assignment::AssignmentEventMapper;
pub use registry::{CalendarEventMapping, EventMappingService, MappingStatus};

/// Trim and collapse inner whitespace.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// [`collapse_whitespace`] plus lowercase; used to match titles.
pub fn normalize_text(s: &str) -> String {
    collapse_whitespace(s).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_collapses_whitespace() {
        assert_eq!(normalize_text("  CS101:\tFinal   Essay \n"), "cs101: final essay");
        assert_eq!(normalize_text(""), "");
    }
}
