//! Page title normalization.

use std::collections::BTreeMap;

/// Converts a full page title into the form stored in the `page` table.
///
/// The namespace prefix is stripped and spaces become underscores, so
/// `"Help talk:Getting started"` in namespace 13 is stored as
/// `"Getting_started"`. Titles in the main namespace keep any colon they
/// contain.
pub fn db_title(full_title: &str, namespace: i32, namespaces: &BTreeMap<i32, String>) -> String {
    let pagename = if namespace == 0 {
        full_title
    } else {
        strip_namespace(full_title, namespaces.get(&namespace).map(String::as_str))
    };
    pagename.trim().replace(' ', "_")
}

fn strip_namespace<'t>(full_title: &'t str, ns_name: Option<&str>) -> &'t str {
    if let Some(name) = ns_name.filter(|name| !name.is_empty()) {
        if let Some(rest) = full_title
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix(':'))
        {
            return rest;
        }
    }
    // unknown namespace name: the prefix ends at the first colon
    match full_title.split_once(':') {
        Some((_, rest)) => rest,
        None => full_title,
    }
}
