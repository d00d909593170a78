//! Identifier quoting shared by the query and schema compilers
//!
//! Every table and column name that ends up in generated SQL passes through
//! [`wrap`], which backtick-quotes each dotted segment and doubles embedded
//! backticks. Values never pass through here: they are always bound.

/// Quote an identifier such as `users`, `users.id` or `users.*`.
///
/// A bare `*` and a trailing `.*` segment are left unquoted. An `AS` alias
/// (`name as alias`) quotes both sides.
pub fn wrap(identifier: &str) -> String {
    let trimmed = identifier.trim();

    if let Some((expr, alias)) = split_alias(trimmed) {
        return format!("{} AS {}", wrap(expr), wrap_segment(alias));
    }

    trimmed
        .split('.')
        .map(|segment| {
            if segment == "*" {
                segment.to_string()
            } else {
                wrap_segment(segment)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn wrap_segment(segment: &str) -> String {
    format!("`{}`", segment.trim().replace('`', "``"))
}

fn split_alias(identifier: &str) -> Option<(&str, &str)> {
    let lower = identifier.to_ascii_lowercase();
    let idx = lower.find(" as ")?;
    Some((&identifier[..idx], &identifier[idx + 4..]))
}

/// Quote and comma-join a list of identifiers.
pub fn columnize<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| wrap(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `count` comma-separated `?` placeholders.
pub fn parameterize(count: usize) -> String {
    vec!["?"; count].join(", ")
}
