//! Identifier conversions used for resource paths and route parameters.

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("mouse", "mice"),
];

const UNCOUNTABLE: &[&str] = &["equipment", "information", "news", "series", "species", "sheep", "fish"];

/// Convert a single identifier from camelCase or PascalCase to snake_case.
/// e.g. "userId" -> "user_id", "BlogPost" -> "blog_post"
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' || c == ' ' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

/// "BlogPost" -> "blog-post", "post_comments" -> "post-comments"
pub fn to_kebab_case(s: &str) -> String {
    to_snake_case(s).replace('_', "-")
}

/// Uppercase the first character: "id" -> "Id".
pub fn uc_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Plural of the last word of an identifier. Case of the input is preserved.
pub fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();
    if UNCOUNTABLE.iter().any(|u| lower.ends_with(u)) {
        return word.to_string();
    }
    for (singular, plural) in IRREGULAR {
        if lower.ends_with(singular) {
            let stem = &word[..word.len() - singular.len()];
            return format!("{}{}", stem, match_case(&word[word.len() - singular.len()..], plural));
        }
    }
    if let Some(stem) = lower.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{}ies", &word[..word.len() - 1]);
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| lower.ends_with(suffix)) {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

fn match_case(original: &str, replacement: &str) -> String {
    if original.chars().next().is_some_and(char::is_uppercase) {
        uc_first(replacement)
    } else {
        replacement.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake() {
        assert_eq!(to_snake_case("BlogPost"), "blog_post");
        assert_eq!(to_snake_case("userId"), "user_id");
    }

    #[test]
    fn kebab() {
        assert_eq!(to_kebab_case("BlogPosts"), "blog-posts");
        assert_eq!(to_kebab_case("post_comments"), "post-comments");
        assert_eq!(to_kebab_case("categories"), "categories");
    }

    #[test]
    fn first_letter_upper() {
        assert_eq!(uc_first("id"), "Id");
        assert_eq!(uc_first("postId"), "PostId");
        assert_eq!(uc_first(""), "");
    }

    #[test]
    fn plural_forms() {
        assert_eq!(pluralize("Post"), "Posts");
        assert_eq!(pluralize("Category"), "Categories");
        assert_eq!(pluralize("Day"), "Days");
        assert_eq!(pluralize("Address"), "Addresses");
        assert_eq!(pluralize("Person"), "People");
        assert_eq!(pluralize("News"), "News");
    }
}
