//! Argument validators attached to command registrations.

use std::fmt;

/// Converts the raw argument of a command into a typed value.
///
/// Validators are plain function pointers paired with a name used in
/// diagnostics, so custom ones are cheap to declare:
///
/// ```ignore
/// const PERCENT: Validator<u8> = Validator::new("percent", |raw| {
///     raw.parse::<u8>()
///         .ok()
///         .filter(|value| *value <= 100)
///         .ok_or_else(|| "expected 0..=100".to_owned())
/// });
/// ```
pub struct Validator<T> {
    name: &'static str,
    parse: fn(&str) -> Result<T, String>,
}

impl<T> Validator<T> {
    /// Builds a validator from a name and a parse function.
    #[must_use]
    pub const fn new(name: &'static str, parse: fn(&str) -> Result<T, String>) -> Self {
        Self { name, parse }
    }

    /// Name reported in diagnostics and by dispatcher introspection.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the validator over `raw`.
    ///
    /// # Errors
    ///
    /// Returns the validator's message when `raw` is rejected.
    pub fn validate(&self, raw: &str) -> Result<T, String> {
        (self.parse)(raw)
    }
}

impl<T> Clone for Validator<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Validator<T> {}

impl<T> fmt::Debug for Validator<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Validator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Validator<i64> {
    /// Signed 64-bit integer.
    #[must_use]
    pub fn integer() -> Self {
        Self::new("integer", |raw| {
            raw.trim()
                .parse::<i64>()
                .map_err(|error| error.to_string())
        })
    }
}

impl Validator<f64> {
    /// Finite 64-bit float.
    #[must_use]
    pub fn float() -> Self {
        Self::new("float", |raw| {
            let value = raw
                .trim()
                .parse::<f64>()
                .map_err(|error| error.to_string())?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(format!("{raw} is not a finite number"))
            }
        })
    }
}

impl Validator<String> {
    /// Accepts any text unchanged.
    #[must_use]
    pub fn text() -> Self {
        Self::new("text", |raw| Ok(raw.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("42", Some(42))]
    #[case("-7", Some(-7))]
    #[case(" 3 ", Some(3))]
    #[case("abc", None)]
    #[case("4.2", None)]
    fn integer_validator(#[case] raw: &str, #[case] expected: Option<i64>) {
        assert_eq!(Validator::integer().validate(raw).ok(), expected);
    }

    #[rstest]
    #[case("10.0", Some(10.0))]
    #[case("-0.5", Some(-0.5))]
    #[case("1e3", Some(1000.0))]
    #[case("NaN", None)]
    #[case("inf", None)]
    #[case("ten", None)]
    fn float_validator(#[case] raw: &str, #[case] expected: Option<f64>) {
        assert_eq!(Validator::float().validate(raw).ok(), expected);
    }

    #[test]
    fn text_validator_is_identity() {
        assert_eq!(
            Validator::text().validate("hello  world").as_deref(),
            Ok("hello  world")
        );
    }
}
