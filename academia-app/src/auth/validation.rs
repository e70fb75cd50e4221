//! Client-side checks for the sign-in and sign-up forms

use once_cell::sync::Lazy;
use regex::Regex;

pub const MIN_NAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

const INVALID_EMAIL: &str = "Invalid email address";
const SHORT_PASSWORD: &str = "Password must be at least 6 characters";

#[derive(Debug, Clone, Default)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

impl SignInForm {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if !EMAIL_RE.is_match(self.email.trim()) {
            errors.push(FieldError {
                field: "email",
                message: INVALID_EMAIL,
            });
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.push(FieldError {
                field: "password",
                message: SHORT_PASSWORD,
            });
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignUpForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignUpForm {
    /// Every failed rule, in field order
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut fail = |field, message| errors.push(FieldError { field, message });

        if self.name.trim().chars().count() < MIN_NAME_LEN {
            fail("name", "Name must be at least 3 characters");
        }
        if !EMAIL_RE.is_match(self.email.trim()) {
            fail("email", INVALID_EMAIL);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            fail("password", SHORT_PASSWORD);
        }
        if !self.password.chars().any(|c| c.is_ascii_uppercase())
            || !self.password.chars().any(|c| c.is_ascii_digit())
        {
            fail(
                "password",
                "Password must contain at least one uppercase letter and one number",
            );
        }
        if self.password != self.confirm_password {
            fail("confirm_password", "Passwords do not match");
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
