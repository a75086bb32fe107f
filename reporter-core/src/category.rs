//! Category key normalization applied before grouping.

/// Label used for transactions that carry no category.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Normalize a raw category label: trim, collapse inner whitespace, lowercase.
/// Blank labels map to [`UNCATEGORIZED`].
pub fn normalize_category(raw: &str) -> String {
    let key = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if key.is_empty() {
        UNCATEGORIZED.to_string()
    } else {
        key
    }
}

/// Title-case a normalized key for display ("eating out" -> "Eating Out").
pub fn display_category(key: &str) -> String {
    key.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_whitespace_fold_together() {
        assert_eq!(normalize_category("Food"), "food");
        assert_eq!(normalize_category("food "), "food");
        assert_eq!(normalize_category("  FOOD\t"), "food");
        assert_eq!(normalize_category("Eating   Out"), "eating out");
    }

    #[test]
    fn test_blank_is_uncategorized() {
        assert_eq!(normalize_category(""), UNCATEGORIZED);
        assert_eq!(normalize_category("   "), UNCATEGORIZED);
    }

    #[test]
    fn test_display_category() {
        assert_eq!(display_category("eating out"), "Eating Out");
        assert_eq!(display_category("food"), "Food");
    }
}
