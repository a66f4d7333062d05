//! English singularization for relationship and model names.

/// Nouns whose singular and plural are the same word.
const UNCOUNTABLE: [&str; 6] = ["series", "species", "news", "metadata", "status", "sheep"];

/// Singularize a table-style plural: `categories` → `category`, `addresses` → `address`,
/// `books` → `book`. Words that do not look plural are returned unchanged.
pub fn singularize(word: &str) -> String {
    if UNCOUNTABLE.contains(&word) {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if word.len() > suffix.len() && word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => word.to_string(),
    }
}
