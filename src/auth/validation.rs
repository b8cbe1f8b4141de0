//! Form rules for registration and login input.
//!
//! Uniqueness of names and emails is checked by the identity store; everything
//! that can be decided from the input alone lives here.

use serde::Serialize;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MIN_PASSWORD_LEN: usize = 6;

/// One violated rule on one form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Registration form as submitted, after trimming name and email.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

impl Registration {
    #[must_use]
    pub fn new(name: &str, email: &str, password: &str, password_confirmation: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
            password_confirmation: password_confirmation.to_string(),
        }
    }

    /// Check every input-only rule and collect all violations.
    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push(FieldError::new("name", "The name field is required."));
        } else if self.name.chars().count() > MAX_NAME_LEN {
            errors.push(FieldError::new(
                "name",
                format!("The name may not be greater than {MAX_NAME_LEN} characters."),
            ));
        }

        if self.email.is_empty() {
            errors.push(FieldError::new("email", "The email field is required."));
        } else {
            if !is_email(&self.email) {
                errors.push(FieldError::new(
                    "email",
                    "The email must be a valid email address.",
                ));
            }
            if self.email.chars().count() > MAX_EMAIL_LEN {
                errors.push(FieldError::new(
                    "email",
                    format!("The email may not be greater than {MAX_EMAIL_LEN} characters."),
                ));
            }
        }

        if self.password.is_empty() {
            errors.push(FieldError::new("password", "The password field is required."));
        } else {
            if self.password.chars().count() < MIN_PASSWORD_LEN {
                errors.push(FieldError::new(
                    "password",
                    format!("The password must be at least {MIN_PASSWORD_LEN} characters."),
                ));
            }
            if self.password != self.password_confirmation {
                errors.push(FieldError::new(
                    "password",
                    "The password confirmation does not match.",
                ));
            }
        }

        errors
    }
}

/// Syntactic email check: one `@`, a non-empty local part, and a dotted domain
/// without whitespace or empty labels.
#[must_use]
pub fn is_email(input: &str) -> bool {
    let Some((local, domain)) = input.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    if input.chars().any(char::is_whitespace) {
        return false;
    }
    domain.contains('.') && domain.split('.').all(|label| !label.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(errors: &[FieldError]) -> Vec<&'static str> {
        errors.iter().map(|e| e.field).collect()
    }

    #[test]
    fn valid_registration_has_no_errors() {
        let form = Registration::new("alice", "alice@example.com", "secret1", "secret1");
        assert!(form.validate().is_empty());
    }

    #[test]
    fn all_violations_are_collected() {
        let form = Registration::new("", "not-an-email", "abc", "abd");
        let errors = form.validate();
        assert_eq!(fields(&errors), vec!["name", "email", "password", "password"]);
    }

    #[test]
    fn name_is_trimmed_before_checks() {
        let form = Registration::new("   ", "a@b.co", "secret1", "secret1");
        assert_eq!(fields(&form.validate()), vec!["name"]);
    }

    #[test]
    fn long_name_and_email_are_rejected() {
        let long = "a".repeat(256);
        let email = format!("{}@example.com", "b".repeat(250));
        let form = Registration::new(&long, &email, "secret1", "secret1");
        assert_eq!(fields(&form.validate()), vec!["name", "email"]);
    }

    #[test]
    fn exact_length_limits_are_accepted() {
        let name = "a".repeat(MAX_NAME_LEN);
        let form = Registration::new(&name, "a@b.co", "123456", "123456");
        assert!(form.validate().is_empty());
    }

    #[test]
    fn email_shapes() {
        assert!(is_email("alice@example.com"));
        assert!(is_email("a.b+c@sub.example.org"));
        assert!(!is_email("alice"));
        assert!(!is_email("alice@"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("alice@example"));
        assert!(!is_email("alice@@example.com"));
        assert!(!is_email("al ice@example.com"));
        assert!(!is_email("alice@example..com"));
    }
}
