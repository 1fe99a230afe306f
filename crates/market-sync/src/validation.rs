//! Declarative form validation.
//!
//! A `Schema` maps field names to ordered `(Rule, message)` pairs. The first
//! failing rule of a field decides its message. Schemas know nothing about
//! rendering; callers get a field -> message map back.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;

/// Raw form input keyed by field name.
pub type FormValues = BTreeMap<String, String>;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,4}$").expect("email pattern is valid")
});

/// Punctuation accepted in passwords.
const PASSWORD_SPECIALS: &str = "@$!%*#?&;:`\"'<,>./~^_=+-";

const PASSWORD_MESSAGE: &str =
    "Minimum eight characters, at least one letter, one number and one special character";

/// Character classes used by `Contains` and `AllowedChars`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    Letter,
    Digit,
    PasswordSpecial,
    /// Letters, digits and password specials
    PasswordAlphabet,
}

impl CharClass {
    fn contains(&self, c: char) -> bool {
        match self {
            CharClass::Letter => c.is_ascii_alphabetic(),
            CharClass::Digit => c.is_ascii_digit(),
            CharClass::PasswordSpecial => PASSWORD_SPECIALS.contains(c),
            CharClass::PasswordAlphabet => c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Rule {
    /// Present and not blank
    Required,
    /// Matches the whole regex
    Pattern(Regex),
    MinLength(usize),
    /// At least one character of the class
    Contains(CharClass),
    /// Only characters of the class
    AllowedChars(CharClass),
    NonNegativeInteger,
    /// Finite and >= 0
    NonNegativeNumber,
    /// `true` or `false`
    Boolean,
}

impl Rule {
    fn check(&self, value: &str) -> bool {
        match self {
            Rule::Required => !value.trim().is_empty(),
            Rule::Pattern(regex) => regex.is_match(value),
            Rule::MinLength(n) => value.chars().count() >= *n,
            Rule::Contains(class) => value.chars().any(|c| class.contains(c)),
            Rule::AllowedChars(class) => value.chars().all(|c| class.contains(c)),
            Rule::NonNegativeInteger => value.trim().parse::<u32>().is_ok(),
            Rule::NonNegativeNumber => value
                .trim()
                .parse::<f64>()
                .is_ok_and(|n| n.is_finite() && n >= 0.0),
            Rule::Boolean => matches!(value.trim(), "true" | "false"),
        }
    }
}

/// Field -> first failing message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", summary(.errors))]
pub struct ValidationErrors {
    errors: BTreeMap<String, String>,
}

fn summary(errors: &BTreeMap<String, String>) -> String {
    errors.values().cloned().collect::<Vec<_>>().join("; ")
}

impl ValidationErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.into(), message.into());
        Self { errors }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone)]
struct FieldRules {
    name: String,
    rules: Vec<(Rule, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldRules>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule to `field`. Rules run in the order they were added.
    pub fn rule(mut self, field: &str, rule: Rule, message: &str) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field) {
            Some(existing) => existing.rules.push((rule, message.to_string())),
            None => self.fields.push(FieldRules {
                name: field.to_string(),
                rules: vec![(rule, message.to_string())],
            }),
        }
        self
    }

    /// Validate every field in the schema. Missing fields count as empty.
    pub fn validate(&self, values: &FormValues) -> Result<(), ValidationErrors> {
        self.run(values, false)
    }

    /// Validate only the fields present in `values` (partial updates).
    pub fn validate_present(&self, values: &FormValues) -> Result<(), ValidationErrors> {
        self.run(values, true)
    }

    fn run(&self, values: &FormValues, present_only: bool) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        for field in &self.fields {
            let value = match values.get(&field.name) {
                Some(value) => value.as_str(),
                None if present_only => continue,
                None => "",
            };
            let optional_and_blank = value.trim().is_empty()
                && !field.rules.iter().any(|(rule, _)| matches!(rule, Rule::Required));
            if optional_and_blank {
                continue;
            }
            if let Some((_, message)) = field.rules.iter().find(|(rule, _)| !rule.check(value)) {
                errors.errors.insert(field.name.clone(), message.clone());
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Email/password sign-in form.
pub fn login_schema() -> Schema {
    Schema::new()
        .rule("email", Rule::Required, "Email is required")
        .rule("email", Rule::Pattern(EMAIL_PATTERN.clone()), "Invalid email address")
        .rule("password", Rule::Required, "Password is required")
        .rule("password", Rule::MinLength(8), PASSWORD_MESSAGE)
        .rule("password", Rule::Contains(CharClass::Letter), PASSWORD_MESSAGE)
        .rule("password", Rule::Contains(CharClass::Digit), PASSWORD_MESSAGE)
        .rule("password", Rule::Contains(CharClass::PasswordSpecial), PASSWORD_MESSAGE)
        .rule("password", Rule::AllowedChars(CharClass::PasswordAlphabet), PASSWORD_MESSAGE)
}

/// Create/edit listing form. Keys use the remote field names.
pub fn listing_schema() -> Schema {
    Schema::new()
        .rule("name", Rule::Required, "Book name is required")
        .rule("category", Rule::Required, "Category is required")
        .rule("quantity", Rule::Required, "Quantity is required")
        .rule(
            "quantity",
            Rule::NonNegativeInteger,
            "Quantity must be a whole number of 0 or more",
        )
        .rule("available", Rule::Boolean, "Availability must be true or false")
        .rule("sellingPrice", Rule::Required, "Selling price is required")
        .rule(
            "sellingPrice",
            Rule::NonNegativeNumber,
            "Selling price must be a number of 0 or more",
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> FormValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_login_schema_accepts_valid_credentials() {
        let form = values(&[("email", "james15-1234@diu.edu.bd"), ("password", "abc12345!")]);
        assert!(login_schema().validate(&form).is_ok());
    }

    #[test]
    fn test_login_schema_reports_first_failure_per_field() {
        let errors = login_schema()
            .validate(&values(&[("email", ""), ("password", "short")]))
            .unwrap_err();

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.get("email"), Some("Email is required"));
        assert_eq!(errors.get("password"), Some(PASSWORD_MESSAGE));
    }

    #[test]
    fn test_email_pattern_is_case_insensitive() {
        let schema = login_schema();
        let form = values(&[("email", "A@X.EDU"), ("password", "abc12345!")]);
        assert!(schema.validate(&form).is_ok());

        let form = values(&[("email", "not-an-email"), ("password", "abc12345!")]);
        assert_eq!(
            schema.validate(&form).unwrap_err().get("email"),
            Some("Invalid email address")
        );
    }

    #[test]
    fn test_password_requires_each_class() {
        let schema = login_schema();
        for bad in ["abcdefgh!", "12345678!", "abcd12345", "abc 12345!"] {
            let form = values(&[("email", "a@x.edu"), ("password", bad)]);
            assert!(schema.validate(&form).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_listing_schema_numbers() {
        let schema = listing_schema();
        let mut form = values(&[
            ("name", "Algo"),
            ("category", "CSE"),
            ("quantity", "2"),
            ("sellingPrice", "120.5"),
        ]);
        assert!(schema.validate(&form).is_ok());

        form.insert("quantity".into(), "-1".into());
        form.insert("sellingPrice".into(), "free".into());
        let errors = schema.validate(&form).unwrap_err();
        assert_eq!(
            errors.get("quantity"),
            Some("Quantity must be a whole number of 0 or more")
        );
        assert_eq!(
            errors.get("sellingPrice"),
            Some("Selling price must be a number of 0 or more")
        );
    }

    #[test]
    fn test_optional_field_skipped_when_blank() {
        let form = values(&[
            ("name", "Algo"),
            ("category", "CSE"),
            ("quantity", "0"),
            ("sellingPrice", "0"),
            ("available", ""),
        ]);
        assert!(listing_schema().validate(&form).is_ok());
    }

    #[test]
    fn test_validate_present_ignores_missing_fields() {
        let schema = listing_schema();
        assert!(schema.validate_present(&values(&[("quantity", "0")])).is_ok());

        let errors = schema
            .validate_present(&values(&[("name", "  ")]))
            .unwrap_err();
        assert_eq!(errors.get("name"), Some("Book name is required"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_errors_display_joins_messages() {
        let errors = ValidationErrors::single("name", "Book name is required");
        assert_eq!(errors.to_string(), "Book name is required");
    }
}
