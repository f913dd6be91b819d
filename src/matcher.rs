use std::collections::HashSet;

use crate::catalog::ProcedureTemplate;

/// Determines which templates a search is about. Case-insensitive substring
/// containment on name/description, exact category id; both filters AND when
/// present, both absent matches everything. An empty result is a valid "no
/// results" outcome, not an error.
pub fn match_templates(
    templates: &[ProcedureTemplate],
    query: Option<&str>,
    category_id: Option<&str>,
) -> HashSet<String> {
    let needle = query
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let category_id = category_id.map(str::trim).filter(|s| !s.is_empty());

    templates
        .iter()
        .filter(|t| t.active)
        .filter(|t| match category_id {
            Some(c) => t.category_id == c,
            None => true,
        })
        .filter(|t| match needle.as_deref() {
            Some(n) => {
                t.name.to_lowercase().contains(n)
                    || t.description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(n))
            }
            None => true,
        })
        .map(|t| t.id.clone())
        .collect()
}
