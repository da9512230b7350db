use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;

use smartsheet_core::Row;

/// Names of the FILE attachments already present on `row`.
pub fn existing_names(row: &Row) -> HashSet<&str> {
    row.file_attachments().map(|att| att.name.as_str()).collect()
}

/// Exact, case-sensitive name comparison; extensions are not normalized.
pub fn is_duplicate<S>(name: &str, existing: &HashSet<S>) -> bool
where
    S: Borrow<str> + Eq + Hash,
{
    existing.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::index::fixtures::{file, keyed, link};

    #[test]
    fn only_file_attachments_count_as_existing() {
        let row = keyed(1, 101, vec![file(1, "report.pdf"), link(2, "report link")]);
        let names = existing_names(&row);
        assert_eq!(names, HashSet::from(["report.pdf"]));
    }

    #[test]
    fn comparison_is_exact() {
        let row = keyed(1, 101, vec![file(1, "report.pdf")]);
        let names = existing_names(&row);
        assert!(is_duplicate("report.pdf", &names));
        assert!(!is_duplicate("Report.pdf", &names));
        assert!(!is_duplicate("report.PDF", &names));
        assert!(!is_duplicate("report_v2.pdf", &names));
    }
}
