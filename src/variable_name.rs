//! Validated variable identifiers
//!
//! A [`VariableName`] is a string with limited functionality and some limitations on the
//! allowed characters: it may only contain alphanumeric characters plus the underscore
//! (`_`), must start with a letter, and may not be more than 64 characters long. Variable
//! names are case sensitive.

use std::fmt;

use crate::error::Error;

/// A validated identifier used as a key into a [`crate::context::Context`]'s variable
/// table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableName(String);

const MAX_LEN: usize = 64;

fn check_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier {
            message: "a variable name may not be empty".to_string(),
        });
    }

    if name.len() > MAX_LEN {
        return Err(Error::InvalidIdentifier {
            message: format!("variable name \"{name}\" is too long (>{MAX_LEN} characters)"),
        });
    }

    let mut chars = name.chars();
    let first = chars.next().expect("checked non-empty above");
    if !first.is_ascii_alphabetic() {
        return Err(Error::InvalidIdentifier {
            message: format!("variable name \"{name}\" does not start with a letter"),
        });
    }

    if !chars.all(|c| c == '_' || c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidIdentifier {
            message: format!("variable name \"{name}\" contains illegal characters"),
        });
    }

    Ok(())
}

impl VariableName {
    /// Construct a variable name from a string, validating it.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self(name))
    }

    /// Return the variable name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the length of the variable name.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the variable name is empty. Never true for a validly constructed
    /// `VariableName`, provided for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a suffix, re-validating the result.
    pub fn append(&mut self, suffix: &str) -> Result<(), Error> {
        let mut new_name = self.0.clone();
        new_name.push_str(suffix);
        check_name(&new_name)?;
        self.0 = new_name;
        Ok(())
    }
}

impl TryFrom<&str> for VariableName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for VariableName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        Self::new(value)
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Add<&str> for &VariableName {
    type Output = String;

    fn add(self, rhs: &str) -> String {
        format!("{}{}", self.0, rhs)
    }
}

impl std::ops::AddAssign<&str> for VariableName {
    fn add_assign(&mut self, rhs: &str) {
        // Intentionally panics on an invalid result: `+=` on an identifier type has no
        // sensible fallible signature, matching the append()/try-construct split above.
        self.append(rhs).expect("appending produced an invalid variable name");
    }
}

impl std::borrow::Borrow<str> for VariableName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_simple_name() {
        assert!(VariableName::new("x").is_ok());
        assert!(VariableName::new("my_var_1").is_ok());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(VariableName::new("").is_err());
    }

    #[test]
    fn rejects_leading_digit() {
        assert!(VariableName::new("1x").is_err());
    }

    #[test]
    fn rejects_illegal_characters() {
        assert!(VariableName::new("a-b").is_err());
        assert!(VariableName::new("a.b").is_err());
    }

    #[test]
    fn boundary_length_64_is_accepted_65_is_rejected() {
        let name_64 = "a".repeat(64);
        assert!(VariableName::new(name_64).is_ok());

        let name_65 = "a".repeat(65);
        assert!(VariableName::new(name_65).is_err());
    }

    #[test]
    fn append_validates_the_result() {
        let mut name = VariableName::new("abc").unwrap();
        name.append("_def").unwrap();
        assert_eq!(name.as_str(), "abc_def");

        let mut name2 = VariableName::new("abc").unwrap();
        assert!(name2.append("-x").is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = VariableName::new("a").unwrap();
        let b = VariableName::new("b").unwrap();
        assert!(a < b);
    }
}
