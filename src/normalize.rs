//! Text canonicalization shared by matching, deduplication and folder naming.

/// Lowercases and drops everything that is not alphanumeric.
///
/// Used only as a comparison key, never displayed. `"Master Chef"` and
/// `"MasterChef"` both become `"masterchef"`.
pub fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// URL slug: lowercase alphanumerics separated by single hyphens.
///
/// Space, hyphen and underscore become hyphens, all other punctuation is
/// dropped, runs of hyphens collapse and edge hyphens are trimmed.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if matches!(c, ' ' | '-' | '_') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Title part of a `product_{index:03}_{title}` folder name.
pub fn sanitize_folder_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_spacing_and_punctuation() {
        assert_eq!(normalize("Master Chef"), "masterchef");
        assert_eq!(normalize("MASTER-CHEF!"), "masterchef");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let titles = [
            "Sunfeast Dark Fantasy Choco Fills 75g",
            "  ITC Aashirvaad Atta (5 kg) | Whole Wheat ",
            "İstanbul Çay — 100% Organic",
            "₹ 1,299.00",
            "",
        ];
        for title in titles {
            let once = normalize(title);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", title);
        }
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(
            slugify("Britannia   Good Day!! (Pack of 2)"),
            "britannia-good-day-pack-of-2"
        );
        assert_eq!(slugify("--Sun_Feast--"), "sun-feast");
        assert_eq!(slugify("(!!)"), "");
    }

    #[test]
    fn slug_contains_only_lowercase_alphanumerics_and_single_hyphens() {
        let slug = slugify(" Mom's  Magic - Cashew & Almond 200 g ");
        assert!(!slug.starts_with('-') && !slug.ends_with('-'));
        assert!(!slug.contains("--"));
        assert!(slug
            .chars()
            .all(|c| c == '-' || (c.is_alphanumeric() && !c.is_uppercase())));
        assert_eq!(slug, "moms-magic-cashew-almond-200-g");
    }

    #[test]
    fn folder_title_keeps_word_separators() {
        assert_eq!(
            sanitize_folder_title(" Sunfeast Marie Light (Pack of 3) "),
            "Sunfeast_Marie_Light_Pack_of_3"
        );
        assert_eq!(sanitize_folder_title("a/b\\c:d"), "abcd");
    }
}
